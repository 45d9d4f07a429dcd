//! Supervision of the long-running serve loops.
//!
//! A serve loop is expected to run for the life of the process. When one
//! returns, for whatever reason, it publishes a [`FatalError`] on the
//! termination channel; [`Supervisor::wait`] yields the first of them.

use std::future::Future;
use std::io;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::FatalError;

#[derive(Debug)]
pub struct Supervisor {
    tx: mpsc::UnboundedSender<FatalError>,
    rx: mpsc::UnboundedReceiver<FatalError>,
    /// Tasks still owned by the supervisor; aborted on drop.
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            handles: Vec::new(),
        }
    }

    /// Spawn a serve loop. The loop's return value is the reason it stopped.
    pub fn spawn<F>(&mut self, task: &'static str, serve: F)
    where
        F: Future<Output = io::Error> + Send + 'static,
    {
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            let err = serve.await;
            error!(task, error = %err, "serve loop exited");
            let _ = tx.send(FatalError::new(task, err));
        });
        info!(task, "serve loop started");
        self.handles.push((task, handle));
    }

    /// Names of the loops spawned so far.
    pub fn tasks(&self) -> Vec<&'static str> {
        self.handles.iter().map(|(task, _)| *task).collect()
    }

    /// The first loop to stop.
    pub async fn wait(&mut self) -> FatalError {
        match self.rx.recv().await {
            Some(fatal) => fatal,
            // The supervisor holds a sender, so the channel cannot close.
            None => FatalError::new("supervisor", "termination channel closed"),
        }
    }

    pub fn abort_all(&mut self) {
        for (_, handle) in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.abort_all();
    }
}
