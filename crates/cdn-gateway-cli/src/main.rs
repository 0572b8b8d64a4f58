use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "cdn-gateway")]
#[command(about = "Upload grants, pointer resolution and ingestion for CDN buckets", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the change-notification ingestion loop until Ctrl-C
    Ingest {
        /// Path to the configuration file
        #[arg(short, long)]
        config: String,
    },

    /// Issue an upload grant
    Grant {
        /// Path to the configuration file
        #[arg(short, long)]
        config: String,

        /// Exact size of the upload in bytes
        #[arg(short, long)]
        size: u64,

        /// Minutes the content should stay hosted
        #[arg(short, long)]
        retention_minutes: u64,

        /// Object identifier; the object is stored as cdn/{identifier}
        #[arg(short, long)]
        object_identifier: String,

        /// Identity key of the uploader
        #[arg(short = 'u', long)]
        uploader_identity_key: String,

        /// Output format (json, yaml)
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// Resolve a content pointer to its freshest live object
    Resolve {
        /// Path to the configuration file
        #[arg(short, long)]
        config: String,

        /// uhrp:// content pointer
        #[arg(short, long)]
        pointer: String,

        /// Identity key of the advertiser
        #[arg(short = 'k', long)]
        owner_identity_key: String,

        /// Maximum advertisements to consider
        #[arg(long)]
        limit: Option<usize>,

        /// Advertisements to skip
        #[arg(long)]
        offset: Option<usize>,

        /// Output format (json, yaml)
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// Show an object's metadata
    Head {
        /// Path to the configuration file
        #[arg(short, long)]
        config: String,

        /// Object key
        #[arg(short, long)]
        key: String,

        /// Output format (text, json, yaml)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List objects under a prefix
    List {
        /// Path to the configuration file
        #[arg(short, long)]
        config: String,

        /// Key prefix
        #[arg(short, long, default_value = "cdn/")]
        prefix: String,

        /// Objects per page
        #[arg(long, default_value = "100")]
        page_size: usize,

        /// Continuation token from a previous page
        #[arg(long)]
        token: Option<String>,
    },

    /// Print a presigned download URL
    DownloadUrl {
        /// Path to the configuration file
        #[arg(short, long)]
        config: String,

        /// Object key
        #[arg(short, long)]
        key: String,

        /// URL validity in seconds
        #[arg(long, default_value = "3600")]
        ttl_secs: u64,
    },

    /// Change an object's bound expiry (customtime)
    SetExpiry {
        /// Path to the configuration file
        #[arg(short, long)]
        config: String,

        /// Object key
        #[arg(short, long)]
        key: String,

        /// New expiry as RFC 3339, e.g. 2030-01-01T00:00:00Z
        #[arg(short, long)]
        at: String,
    },

    /// Delete an object
    Delete {
        /// Path to the configuration file
        #[arg(short, long)]
        config: String,

        /// Object key
        #[arg(short, long)]
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    // Priority: RUST_LOG env var > verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Ingest { config } => {
            commands::ingest::run(&config).await?;
        }
        Commands::Grant {
            config,
            size,
            retention_minutes,
            object_identifier,
            uploader_identity_key,
            format,
        } => {
            commands::grant::run(
                &config,
                size,
                retention_minutes,
                &object_identifier,
                &uploader_identity_key,
                commands::OutputFormat::from(format.as_str()),
            )
            .await?;
        }
        Commands::Resolve {
            config,
            pointer,
            owner_identity_key,
            limit,
            offset,
            format,
        } => {
            commands::resolve::run(
                &config,
                &pointer,
                &owner_identity_key,
                limit,
                offset,
                commands::OutputFormat::from(format.as_str()),
            )
            .await?;
        }
        Commands::Head {
            config,
            key,
            format,
        } => {
            commands::objects::head(&config, &key, commands::OutputFormat::from(format.as_str()))
                .await?;
        }
        Commands::List {
            config,
            prefix,
            page_size,
            token,
        } => {
            commands::objects::list(&config, &prefix, page_size, token.as_deref()).await?;
        }
        Commands::DownloadUrl {
            config,
            key,
            ttl_secs,
        } => {
            commands::objects::download_url(&config, &key, ttl_secs).await?;
        }
        Commands::SetExpiry { config, key, at } => {
            commands::objects::set_expiry(&config, &key, &at).await?;
        }
        Commands::Delete { config, key } => {
            commands::objects::delete(&config, &key).await?;
        }
    }

    Ok(())
}
