//! Transport selection and classification across the bridge.

use async_trait::async_trait;
use http::uri::PathAndQuery;
use kubeapps_apis::config::ServeConfig;
use kubeapps_apis::server::Server;
use kubeapps_core::proto::packages::{
    AvailablePackageSummary, GET_AVAILABLE_PACKAGE_SUMMARIES, GetAvailablePackageSummariesRequest,
    GetAvailablePackageSummariesResponse, GetInstalledPackageSummariesRequest,
    GetInstalledPackageSummariesResponse,
};
use kubeapps_core::{PackagesPlugin, PluginHandle};
use serde_json::Value;
use std::net::{Ipv4Addr, SocketAddr};
use tonic::codec::ProstCodec;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};

struct Single;

#[async_trait]
impl PackagesPlugin for Single {
    async fn get_available_package_summaries(
        &self,
        _request: Request<GetAvailablePackageSummariesRequest>,
    ) -> Result<Response<GetAvailablePackageSummariesResponse>, Status> {
        Ok(Response::new(GetAvailablePackageSummariesResponse {
            available_package_summaries: vec![AvailablePackageSummary {
                name: "nginx".into(),
                ..Default::default()
            }],
            ..Default::default()
        }))
    }

    async fn get_installed_package_summaries(
        &self,
        _request: Request<GetInstalledPackageSummariesRequest>,
    ) -> Result<Response<GetInstalledPackageSummariesResponse>, Status> {
        Ok(Response::new(GetInstalledPackageSummariesResponse::default()))
    }
}

async fn start() -> (Server, SocketAddr) {
    let config = ServeConfig {
        port: 0,
        ..ServeConfig::default()
    };
    let plugin = PluginHandle::builder("helm.packages", "v1alpha1").packages(Single).build();
    let server = Server::bootstrap(config, vec![plugin]).await.unwrap();
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, server.front_door_addr().port()));
    (server, addr)
}

async fn available_packages(addr: SocketAddr) -> GetAvailablePackageSummariesResponse {
    let channel = Channel::from_shared(format!("http://{addr}"))
        .unwrap()
        .connect()
        .await
        .unwrap();
    let mut grpc = tonic::client::Grpc::new(channel);
    grpc.ready().await.unwrap();
    grpc.unary(
        Request::new(GetAvailablePackageSummariesRequest::default()),
        PathAndQuery::from_static(GET_AVAILABLE_PACKAGE_SUMMARIES),
        ProstCodec::<GetAvailablePackageSummariesRequest, GetAvailablePackageSummariesResponse>::default(),
    )
    .await
    .unwrap()
    .into_inner()
}

#[tokio::test]
async fn h2_clients_are_bridged_over_h2c() {
    let (server, addr) = start().await;
    let stats = server.bridge_stats();
    tokio::spawn(server.run());

    let response = available_packages(addr).await;
    assert_eq!(response.available_package_summaries[0].name, "nginx");
    assert!(stats.h2c_dials() >= 1);
    assert_eq!(stats.http1_dials(), 0);
}

#[tokio::test]
async fn http1_clients_are_bridged_over_http1() {
    let (server, addr) = start().await;
    let stats = server.bridge_stats();
    tokio::spawn(server.run());

    // The plugins service is answered by the front door itself once the
    // gateway has translated the call, so no h2c dial is involved.
    let response = reqwest::get(format!("http://{addr}/core/plugins/v1alpha1/configured-plugins"))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(stats.http1_dials(), 1);
    assert_eq!(stats.h2c_dials(), 0);
}

#[tokio::test]
async fn mixed_clients_are_classified_concurrently() {
    let (server, addr) = start().await;
    tokio::spawn(server.run());

    let binary = (0..8).map(|_| tokio::spawn(available_packages(addr)));
    let rest = (0..8).map(|_| {
        tokio::spawn(async move {
            reqwest::get(format!("http://{addr}/core/packages/v1alpha1/availablepackages"))
                .await
                .unwrap()
                .json::<Value>()
                .await
                .unwrap()
        })
    });
    let binary: Vec<_> = binary.collect();
    let rest: Vec<_> = rest.collect();

    for call in binary {
        let response = call.await.unwrap();
        assert_eq!(response.available_package_summaries.len(), 1);
    }
    for call in rest {
        let body = call.await.unwrap();
        assert_eq!(body["availablePackageSummaries"][0]["name"], "nginx");
    }
}
