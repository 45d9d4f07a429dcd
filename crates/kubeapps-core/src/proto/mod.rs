//! Wire messages of the core services.
//!
//! The messages are generated from the `.proto` files under `proto/` by the
//! build script. Besides the prost encoding (binary RPC) they carry serde
//! attributes implementing the JSON mapping used by the Connect protocol and
//! the REST/JSON gateway:
//!
//! - field names are `lowerCamelCase`;
//! - fields at their zero value are omitted on output;
//! - unknown fields are ignored on input and missing fields take their zero
//!   value;
//! - integers are accepted as JSON numbers or strings, enums as names or
//!   numbers.
//!
//! [`plugins`], [`packages`] and [`health`] re-export the generated types
//! next to the method paths of each service.

pub mod health;
pub mod json;
pub mod packages;
pub mod plugins;

/// Encoded `FileDescriptorSet` of every compiled `.proto` file.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("kubeapps_descriptor");

/// Generated code, nested the way the protobuf packages are so that
/// cross-package references resolve.
mod generated {
    pub mod kubeappsapis {
        pub mod core {
            pub mod packages {
                pub mod v1alpha1 {
                    tonic::include_proto!("kubeappsapis.core.packages.v1alpha1");
                }
            }
            pub mod plugins {
                pub mod v1alpha1 {
                    tonic::include_proto!("kubeappsapis.core.plugins.v1alpha1");
                }
            }
        }
    }
    pub mod grpc {
        pub mod health {
            pub mod v1 {
                tonic::include_proto!("grpc.health.v1");
            }
        }
    }
}

/// Build the `/package.Service/Method` path of an RPC method.
pub fn method_path(service: &str, method: &str) -> String {
    format!("/{service}/{method}")
}

/// Split a `/package.Service/Method` path into its service and method.
pub fn split_method_path(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix('/')?;
    let (service, method) = rest.split_once('/')?;
    if service.is_empty() || method.is_empty() || method.contains('/') {
        return None;
    }
    Some((service, method))
}
