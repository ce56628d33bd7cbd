//! Mizuchi Stream - pipe a byte stream into an S3 object
//!
//! Reads stdin (or a file) and uploads it as a multipart upload without
//! knowing the total length up front.

use anyhow::Context;
use clap::Parser;
use mizuchi_stream::config::Config;
use mizuchi_stream::s3::{CredentialsProvider, S3Client};
use mizuchi_stream::upload::{
    upload_stream, Destination, MemoryBackend, MultipartBackend, UploadObserver, UploadSession,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Mizuchi Stream - stream stdin or a file into an S3 multipart upload
#[derive(Parser, Debug)]
#[command(name = "mizuchi-stream")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Destination object (s3://bucket/key)
    destination: Destination,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Read from this file instead of stdin
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Expected total length in bytes, used to size parts
    #[arg(long)]
    length_hint: Option<u64>,

    /// Content type of the object
    #[arg(long)]
    content_type: Option<String>,

    /// Upload into memory instead of S3
    #[arg(long)]
    dry_run: bool,

    /// Print Prometheus metrics to stderr on exit
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the outcome
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log level")?;
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .json()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Mizuchi Stream v{}", mizuchi_stream::VERSION);

    let config = match &args.config {
        Some(path) => {
            let config = Config::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => Config::default(),
    };

    let mut session_config = config.upload.session_config(args.destination.clone());
    if let Some(content_type) = &args.content_type {
        session_config.options.content_type = Some(content_type.clone());
    }

    let backend: Arc<dyn MultipartBackend> = if args.dry_run {
        info!("Dry run, uploading into memory");
        Arc::new(MemoryBackend::new())
    } else {
        let credentials = CredentialsProvider::resolve(&config.s3)?;
        let mut client_config = config.s3.client_config();
        client_config.access_key = Some(credentials.access_key_id().to_string());
        client_config.secret_key = Some(credentials.secret_access_key().to_string());
        client_config.session_token = credentials.session_token().map(String::from);
        Arc::new(S3Client::new(client_config)?)
    };

    let mut observers: Vec<Arc<dyn UploadObserver>> = Vec::new();
    #[cfg(feature = "metrics")]
    {
        if config.metrics.enabled {
            observers.push(Arc::new(mizuchi_stream::metrics::MetricsObserver));
        }
    }

    let mut session = UploadSession::with_observers(backend, session_config, observers)?;

    let (mut reader, file_length): (Box<dyn AsyncRead + Unpin + Send>, Option<u64>) =
        match &args.input {
            Some(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("failed to open {}", path.display()))?;
                let length = file.metadata().await?.len();
                (Box::new(file), Some(length))
            }
            None => (Box::new(tokio::io::stdin()), None),
        };

    if let Some(length) = args.length_hint.or(file_length) {
        session.set_length_hint(length);
    }

    let cancel = session.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling upload");
            cancel.cancel();
        }
    });

    let result = upload_stream(session, &mut reader).await;

    #[cfg(feature = "metrics")]
    {
        if result.is_err() {
            mizuchi_stream::metrics::record_upload_failure(&args.destination.bucket);
        }
        if args.metrics {
            eprint!("{}", mizuchi_stream::metrics::render()?);
        }
    }

    let outcome = result?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(())
}
