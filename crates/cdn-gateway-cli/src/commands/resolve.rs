use anyhow::{anyhow, Result};
use cdn_gateway_core::advertisement::{
    AdvertisementResolver, HttpAdvertisementStore, ResolveRequest,
};
use cdn_gateway_core::{create_backend, system_clock};
use std::sync::Arc;
use std::time::Duration;

use super::OutputFormat;

pub async fn run(
    config_path: &str,
    pointer: &str,
    owner_identity_key: &str,
    limit: Option<usize>,
    offset: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let config = super::load_config(config_path)?;
    let advertisements = config
        .advertisements
        .as_ref()
        .ok_or_else(|| anyhow!("advertisements section is required for resolve"))?;

    let store = Arc::new(HttpAdvertisementStore::new(
        advertisements.endpoint.as_str(),
        Duration::from_secs(advertisements.timeout_secs),
    )?);
    let backend = create_backend(&config.storage)?;
    let resolver = AdvertisementResolver::new(store, backend, system_clock());

    let mut request = ResolveRequest::new(pointer, owner_identity_key);
    request.limit = limit;
    request.offset = offset;

    let resolved = resolver.resolve(&request).await?;
    super::print_structured(&resolved, format)
}
