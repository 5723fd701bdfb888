//! strata
//!
//! ```text
//!     Client Request
//!     ──▶ axum (TraceLayer, TimeoutLayer)
//!         ──▶ Server::handle ── Session + Request façade
//!             ──▶ request pipeline (membranes + middleware)
//!                 ──▶ router ──▶ view pipeline ──▶ view
//!             ◀── Reply / HttpError
//!         ◀── response body (settles the request when done)
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;

use strata::commands;
use strata::config::{load_or_default, Settings, SettingsWatcher};
use strata::lifecycle::{self, Shutdown};
use strata::observability::logging::{init_logging, LogFormat};
use strata::observability::metrics::init_metrics;
use strata::routing::Routes;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Layered HTTP request processing", long_about = None)]
struct Cli {
    /// Settings file (TOML). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve HTTP until SIGINT/SIGTERM
    Serve,
    /// List configured routes
    Routes,
    /// Interactive shell running inside a request
    #[command(alias = "repl")]
    Shell,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = load_or_default(cli.config.as_deref())?;

    init_logging(LogFormat::for_environment(
        settings.is_development(),
        settings.observability.json_logs,
    ));

    match cli.command {
        Commands::Serve => serve(settings, cli.config).await?,
        Commands::Routes => {
            let routes = Routes::from_config(&settings.routes)?;
            println!("{}", commands::routes::render(&routes));
        }
        Commands::Shell => {
            let input = tokio::io::BufReader::new(tokio::io::stdin());
            commands::shell::run(&settings, input, tokio::io::stdout()).await?;
        }
    }
    Ok(())
}

async fn serve(settings: Settings, path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        name = %settings.name,
        environment = %settings.environment,
        bind_address = %settings.listener.bind_address,
        request_timeout_secs = settings.timeouts.request_secs,
        "Configuration loaded"
    );

    if settings.observability.metrics_enabled {
        match settings.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %settings.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = lifecycle::build_server(&settings)?;
    let listener = TcpListener::bind(&settings.listener.bind_address).await?;

    // Held for the life of the server; dropping it stops the watch.
    let _watcher = match (&path, settings.hot) {
        (Some(path), true) => {
            let (watcher, mut updates) = SettingsWatcher::new(path);
            let handle = watcher.run()?;
            let server = server.clone();
            tokio::spawn(async move {
                while let Some(settings) = updates.recv().await {
                    if let Err(err) = lifecycle::reload(&server, &settings).await {
                        tracing::error!(error = %err, "Reload failed; keeping the running setup");
                    }
                }
            });
            Some(handle)
        }
        (None, true) => {
            tracing::warn!("hot = true has no effect without --config");
            None
        }
        _ => None,
    };

    let shutdown = Shutdown::new();
    let signalled = shutdown.signalled();
    tokio::spawn(async move {
        lifecycle::wait_for_signal().await;
        shutdown.trigger();
    });

    server.serve(listener, signalled).await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
