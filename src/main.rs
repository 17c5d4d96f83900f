use clap::Parser;
use openai_compat::{build_router, AppState, SharedExchangeLog, ShimConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "openai-compat",
    about = "OpenAI-compatible API in front of a native model server",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Native server base URL (overrides config)
    #[arg(long)]
    native_url: Option<String>,

    /// Exchange log file path
    #[arg(long, default_value = "openai-compat.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "openai_compat=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in openai_compat::config::config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = ShimConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(url) = cli.native_url {
        config.native.base_url = url;
    }

    // Validate config eagerly
    let base_url = config.effective_base_url()?;

    let exchanges = SharedExchangeLog::new(&cli.log_file)?;

    info!("openai-compat v{}", env!("CARGO_PKG_VERSION"));
    info!("  Native:    {}", base_url);
    info!("  Connect:   {}s timeout", config.native.connect_timeout_secs);
    info!("  Log file:  {}", cli.log_file.display());

    let client = openai_compat::upstream::native_client(&config.native)?;

    let bind_addr = config.bind_addr();
    let state = Arc::new(AppState {
        config,
        client,
        exchanges,
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  OPENAI_BASE_URL=http://{}/v1", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
