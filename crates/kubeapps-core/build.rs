use std::path::PathBuf;

const PROTOS: &[&str] = &[
    "proto/kubeappsapis/core/plugins/v1alpha1/plugins.proto",
    "proto/kubeappsapis/core/packages/v1alpha1/packages.proto",
    "proto/kubeappsapis/core/packages/v1alpha1/repositories.proto",
    "proto/grpc/health/v1/health.proto",
];

const PLUGINS: &str = ".kubeappsapis.core.plugins.v1alpha1";
const PACKAGES: &str = ".kubeappsapis.core.packages.v1alpha1";
const HEALTH: &str = ".grpc.health.v1";

/// Messages without nested enums; every field omits its zero value.
const PLAIN_MESSAGES: &[(&str, &str)] = &[
    (PLUGINS, "Plugin"),
    (PLUGINS, "GetConfiguredPluginsResponse"),
    (PACKAGES, "Context"),
    (PACKAGES, "PaginationOptions"),
    (PACKAGES, "FilterOptions"),
    (PACKAGES, "PackageAppVersion"),
    (PACKAGES, "AvailablePackageReference"),
    (PACKAGES, "AvailablePackageSummary"),
    (PACKAGES, "GetAvailablePackageSummariesRequest"),
    (PACKAGES, "GetAvailablePackageSummariesResponse"),
    (PACKAGES, "InstalledPackageReference"),
    (PACKAGES, "InstalledPackageSummary"),
    (PACKAGES, "GetInstalledPackageSummariesRequest"),
    (PACKAGES, "GetInstalledPackageSummariesResponse"),
    (PACKAGES, "PackageRepositoryReference"),
    (PACKAGES, "PackageRepositorySummary"),
    (PACKAGES, "GetPackageRepositorySummariesRequest"),
    (PACKAGES, "GetPackageRepositorySummariesResponse"),
    (PACKAGES, "AddPackageRepositoryRequest"),
    (PACKAGES, "AddPackageRepositoryResponse"),
    (HEALTH, "HealthCheckRequest"),
];

/// Fields of messages that also declare an enum, listed one by one.
const NESTED_ENUM_FIELDS: &[(&str, &str)] = &[
    (PACKAGES, "InstalledPackageStatus.ready"),
    (PACKAGES, "InstalledPackageStatus.reason"),
    (PACKAGES, "InstalledPackageStatus.user_reason"),
    (HEALTH, "HealthCheckResponse.status"),
];

/// `repeated string` fields a query string may carry as a single value.
const REPEATED_STRINGS: &[&str] = &[
    "FilterOptions.categories",
    "FilterOptions.repositories",
    "AvailablePackageSummary.categories",
    "GetAvailablePackageSummariesResponse.categories",
];

const SKIP_DEFAULT: &str = r#"#[serde(skip_serializing_if = "crate::proto::json::is_default")]"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);

    let mut config = tonic_build::Config::new();
    if std::env::var_os("PROTOC").is_none() {
        config.protoc_executable(protoc_bin_vendored::protoc_bin_path()?);
    }

    let mut builder = tonic_build::configure()
        .build_server(false)
        .build_client(false)
        .file_descriptor_set_path(out_dir.join("kubeapps_descriptor.bin"))
        .message_attribute(".", "#[derive(serde::Serialize, serde::Deserialize)]")
        .message_attribute(".", r#"#[serde(rename_all = "camelCase", default)]"#);

    for (package, message) in PLAIN_MESSAGES {
        builder = builder.field_attribute(format!("{package}.{message}"), SKIP_DEFAULT);
    }
    for (package, field) in NESTED_ENUM_FIELDS {
        builder = builder.field_attribute(format!("{package}.{field}"), SKIP_DEFAULT);
    }
    for field in REPEATED_STRINGS {
        builder = builder.field_attribute(
            format!("{PACKAGES}.{field}"),
            r#"#[serde(deserialize_with = "crate::proto::json::one_or_many")]"#,
        );
    }
    builder = builder
        .field_attribute(
            format!("{PACKAGES}.PaginationOptions.page_size"),
            r#"#[serde(deserialize_with = "crate::proto::json::lenient_i32")]"#,
        )
        .field_attribute(
            format!("{PACKAGES}.InstalledPackageStatus.reason"),
            r#"#[serde(
                serialize_with = "crate::proto::json::serialize_enum::<installed_package_status::StatusReason, _>",
                deserialize_with = "crate::proto::json::deserialize_enum::<installed_package_status::StatusReason, _>"
            )]"#,
        )
        .field_attribute(
            format!("{HEALTH}.HealthCheckResponse.status"),
            r#"#[serde(
                serialize_with = "crate::proto::json::serialize_enum::<health_check_response::ServingStatus, _>",
                deserialize_with = "crate::proto::json::deserialize_enum::<health_check_response::ServingStatus, _>"
            )]"#,
        );

    builder.compile_protos_with_config(config, PROTOS, &["proto/"])?;
    Ok(())
}
