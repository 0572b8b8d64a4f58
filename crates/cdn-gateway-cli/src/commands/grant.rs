use anyhow::Result;
use cdn_gateway_core::grant::UploadGrantIssuer;
use cdn_gateway_core::{create_backend, system_clock};
use tracing::info;

use super::OutputFormat;

pub async fn run(
    config_path: &str,
    size: u64,
    retention_minutes: u64,
    object_identifier: &str,
    uploader_identity_key: &str,
    format: OutputFormat,
) -> Result<()> {
    let config = super::load_config(config_path)?;
    let backend = create_backend(&config.storage)?;

    let issuer = UploadGrantIssuer::new(backend, system_clock()).with_ttl(config.grants.ttl());
    let grant = issuer
        .issue(size, retention_minutes, object_identifier, uploader_identity_key)
        .await?;

    info!("Grant valid until {}", grant.expires_at);
    super::print_structured(&grant, format)
}
