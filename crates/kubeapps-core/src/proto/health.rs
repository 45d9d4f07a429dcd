//! `grpc.health.v1`

pub use super::generated::grpc::health::v1::health_check_response::ServingStatus;
pub use super::generated::grpc::health::v1::*;

pub const HEALTH_SERVICE: &str = "grpc.health.v1.Health";

pub const CHECK: &str = "/grpc.health.v1.Health/Check";

pub const WATCH: &str = "/grpc.health.v1.Health/Watch";

crate::proto::json::proto_enum!(ServingStatus);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_is_written_by_name() {
        let resp = HealthCheckResponse {
            status: ServingStatus::Serving as i32,
        };
        assert_eq!(serde_json::to_value(&resp).unwrap(), json!({ "status": "SERVING" }));
        assert_eq!(
            serde_json::to_value(HealthCheckResponse::default()).unwrap(),
            json!({})
        );
    }

    #[test]
    fn status_is_read_by_name_or_number() {
        let by_name: HealthCheckResponse =
            serde_json::from_value(json!({ "status": "NOT_SERVING" })).unwrap();
        let by_number: HealthCheckResponse = serde_json::from_value(json!({ "status": 2 })).unwrap();
        assert_eq!(by_name.status, ServingStatus::NotServing as i32);
        assert_eq!(by_number, by_name);
    }
}
