use clap::Parser;
use switchboard_core::SwitchboardConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use switchboard_server::subsystems::lifecycle;
use switchboard_server::{server, SessionService};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "switchboard.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience, production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let mut config = match SwitchboardConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };
    if config.database.url.is_empty() {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }
    }

    // Init logging: RUST_LOG wins, otherwise [service] log_level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    if args.health {
        if config.database.backend != "postgres" {
            println!("✅ Store backend '{}' needs no connection", config.database.backend);
            return Ok(());
        }
        let pool = match switchboard_core::db::create_pool(&config.database).await {
            Ok(p) => p,
            Err(e) => {
                println!("❌ PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        };
        match switchboard_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ PostgreSQL connected: {}", v),
            Err(e) => {
                println!("❌ PostgreSQL health check failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ Switchboard DB health check passed");
        return Ok(());
    }

    let store = match switchboard_core::store::create_store(&config.database).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to open store: {}", e);
            std::process::exit(1);
        }
    };
    let factory = switchboard_core::client::create_factory(&config.messaging)?;
    let service = SessionService::from_parts(store, factory, &config);
    let controller = service.controller().clone();

    // Re-attach sessions from the previous run before accepting traffic
    match controller.resume_all_active_sessions().await {
        Ok(report) => tracing::info!(
            "Resumed {} sessions ({} demoted, {} failed)",
            report.resumed,
            report.demoted,
            report.failed
        ),
        Err(e) => tracing::error!("Session resume failed: {}", e),
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    // Retention sweep
    tokio::spawn(lifecycle::run_cleanup_loop(
        controller.clone(),
        config.sessions.cleanup_interval_minutes,
        tx.subscribe(),
    ));

    // HTTP API if enabled
    if config.http.enabled {
        let http_service = service.clone();
        let http_config = config.clone();
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) =
                switchboard_server::http::start_http_server(http_service, http_config, http_shutdown)
                    .await
            {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    let socket_path = config.service.socket_path.clone();
    let result = server::run_realtime_server(&socket_path, service, tx.subscribe()).await;

    controller.shutdown().await;
    result
}
