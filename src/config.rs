use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Default request body cap: the 10 MiB image limit plus room for multipart framing.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 11 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub upload_bucket: String,
    pub metadata_table: String,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Image upload and metadata pipeline")]
pub struct Args {
    /// Host to bind to (overrides IMAGE_PIPELINE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides IMAGE_PIPELINE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploaded blobs are stored (overrides IMAGE_PIPELINE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides IMAGE_PIPELINE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket receiving uploads (overrides UPLOAD_BUCKET)
    #[arg(long)]
    pub upload_bucket: Option<String>,

    /// Table holding image metadata records (overrides DDB_TABLE or its alias METADATA_TABLE)
    #[arg(long)]
    pub metadata_table: Option<String>,

    /// Maximum accepted upload body in bytes (overrides IMAGE_PIPELINE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Create the schema and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// Layer CLI overrides on top of the environment (and built-in defaults).
    pub fn merge(args: Args) -> Result<Self> {
        Self::merge_with(args, |name| env::var(name).ok())
    }

    /// `merge` against an arbitrary variable lookup instead of the process environment.
    pub fn merge_with(args: Args, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_host = var("IMAGE_PIPELINE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_var(&var, "IMAGE_PIPELINE_PORT", 3000u16)?;
        let env_storage =
            var("IMAGE_PIPELINE_STORAGE_DIR").unwrap_or_else(|| "./data/objects".into());
        let env_db = var("IMAGE_PIPELINE_DATABASE_URL")
            .unwrap_or_else(|| "sqlite://./data/meta/image_pipeline.db".into());
        let env_bucket = var("UPLOAD_BUCKET").unwrap_or_else(|| "image-uploads".into());
        // METADATA_TABLE is an alias; DDB_TABLE wins when both are set.
        let env_table = var("DDB_TABLE")
            .or_else(|| var("METADATA_TABLE"))
            .unwrap_or_else(|| "image_metadata".into());
        let env_max_upload =
            parse_var(&var, "IMAGE_PIPELINE_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            upload_bucket: args.upload_bucket.unwrap_or(env_bucket),
            metadata_table: args.metadata_table.unwrap_or(env_table),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Some(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(default),
    }
}
