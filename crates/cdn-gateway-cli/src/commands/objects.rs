use anyhow::{anyhow, Result};
use cdn_gateway_core::{create_backend, StorageBackend};
use cdn_gateway_core::storage::{format_custom_time, parse_custom_time, MetadataPatch};
use std::time::Duration;
use tracing::info;

use super::OutputFormat;

pub async fn head(config_path: &str, key: &str, format: OutputFormat) -> Result<()> {
    let config = super::load_config(config_path)?;
    let backend = create_backend(&config.storage)?;
    let metadata = backend.head(key).await?;

    match format {
        OutputFormat::Text => {
            println!("Key: {}", key);
            println!("Size: {} bytes", metadata.size);
            println!(
                "Content-Type: {}",
                metadata.content_type.as_deref().unwrap_or("-")
            );
            println!("Last Modified: {}", metadata.last_modified);
            if let Some(etag) = &metadata.e_tag {
                println!("ETag: {}", etag);
            }
            println!(
                "Uploader: {}",
                metadata.uploader_identity_key().unwrap_or("(missing)")
            );
            match metadata.custom_time() {
                Some(at) => println!("Expires: {}", format_custom_time(at)),
                None => println!("Expires: (not set)"),
            }
            if !metadata.custom.is_empty() {
                println!("\nMetadata:");
                for (name, value) in metadata.custom.iter() {
                    println!("  {}: {}", name, value);
                }
            }
        }
        _ => super::print_structured(&metadata, format)?,
    }

    Ok(())
}

pub async fn list(
    config_path: &str,
    prefix: &str,
    page_size: usize,
    token: Option<&str>,
) -> Result<()> {
    let config = super::load_config(config_path)?;
    let backend = create_backend(&config.storage)?;

    info!("Listing objects under: {}", prefix);
    let page = backend.list(prefix, page_size, token).await?;

    if page.objects.is_empty() {
        println!("No objects found under {}", prefix);
    } else {
        for object in &page.objects {
            println!(
                "{:>12}  {}  {}",
                object.size,
                object.last_modified.format("%Y-%m-%d %H:%M:%S"),
                object.key
            );
        }
    }
    if let Some(next) = &page.next_token {
        println!("\nMore results: --token {}", next);
    }

    Ok(())
}

pub async fn download_url(config_path: &str, key: &str, ttl_secs: u64) -> Result<()> {
    let config = super::load_config(config_path)?;
    let backend = create_backend(&config.storage)?;

    let url = backend
        .issue_download_grant(key, Duration::from_secs(ttl_secs))
        .await?;
    println!("{}", url);
    Ok(())
}

pub async fn set_expiry(config_path: &str, key: &str, at: &str) -> Result<()> {
    let expiry = parse_custom_time(at)
        .ok_or_else(|| anyhow!("Invalid expiry {:?}, expected RFC 3339", at))?;

    let config = super::load_config(config_path)?;
    let backend = create_backend(&config.storage)?;

    backend
        .update_metadata(key, &MetadataPatch::custom_time(expiry))
        .await?;
    println!("{} now expires at {}", key, format_custom_time(expiry));
    Ok(())
}

pub async fn delete(config_path: &str, key: &str) -> Result<()> {
    let config = super::load_config(config_path)?;
    let backend = create_backend(&config.storage)?;

    backend.delete(key).await?;
    println!("Deleted {}", key);
    Ok(())
}
