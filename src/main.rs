use clap::{Parser, Subcommand};
use simple_site_deploy::builder::HugoBuilder;
use simple_site_deploy::config::DeployConfig;
use simple_site_deploy::dispatch::{RunMode, process_delivery};
use simple_site_deploy::error::{DeployError, Result};
use simple_site_deploy::handlers::router;
use simple_site_deploy::logging::{FileLogger, setup_logging};
use simple_site_deploy::pipeline::Pipeline;
use simple_site_deploy::storage::{MemoryStore, ObjectStore, S3Store};
use simple_site_deploy::transport::{ApiGatewayProxyRequest, WebhookEvent};
use simple_site_deploy::AppState;
use std::io::Read;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(version, about = "Rebuild a Hugo site and publish it to S3 on GitHub pushes")]
struct Cli {
    /// Sync into an in-memory bucket instead of S3
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Listen for webhook deliveries (default)
    Serve,
    /// Run fetch, build and sync once without a webhook
    Deploy,
    /// Handle one API-Gateway proxy event and print the response
    Invoke {
        /// Path to the event JSON, or `-` for stdin
        #[arg(long, default_value = "-")]
        event: String,
    },
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = match DeployConfig::load() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let file_logger = config.log_dir.clone().map(FileLogger::new);
    let _log_guard = match setup_logging(file_logger.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to set up logging: {}", e);
            std::process::exit(1);
        }
    };

    if config.secret().is_none() {
        warn!("No webhook secret configured; signatures will not be verified");
    }

    let store: Arc<dyn ObjectStore> = if cli.dry_run {
        warn!("Dry run: syncing into an in-memory bucket");
        Arc::new(MemoryStore::new(config.bucket.clone()))
    } else {
        Arc::new(S3Store::new(&config).await)
    };
    let builder = Arc::new(HugoBuilder::new(
        config.hugo_bin.clone(),
        config.output_subdir.clone(),
    ));
    let pipeline = Arc::new(Pipeline::new(Arc::clone(&config), builder, store));

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(pipeline, &config.bind_address).await,
        Command::Deploy => deploy(&pipeline).await,
        Command::Invoke { event } => invoke(&pipeline, &event).await,
    };

    if let Err(e) = result {
        error!(error_kind = e.kind(), "{}", e);
        std::process::exit(1);
    }
}

async fn serve(pipeline: Arc<Pipeline>, bind_address: &str) -> Result<()> {
    let state = Arc::new(AppState::new(pipeline));
    let app = router(state);

    info!("Listening on {}", bind_address);
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn deploy(pipeline: &Pipeline) -> Result<()> {
    let report = pipeline.run().await?;
    info!(
        "Deployed {} files from {} ({} old objects removed)",
        report.sync.uploaded.len(),
        report.output_dir.display(),
        report.sync.deleted
    );
    Ok(())
}

async fn invoke(pipeline: &Arc<Pipeline>, source: &str) -> Result<()> {
    let raw = if source == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        tokio::fs::read_to_string(source).await?
    };
    let request: ApiGatewayProxyRequest = serde_json::from_str(&raw)
        .map_err(|e| DeployError::ConfigError(format!("invalid proxy event: {}", e)))?;

    let event = WebhookEvent::from(request);
    let response = process_delivery(pipeline, &event, RunMode::Inline).await;
    let body = serde_json::to_string(&response)
        .map_err(|e| DeployError::ConfigError(format!("cannot encode response: {}", e)))?;
    println!("{}", body);
    Ok(())
}
