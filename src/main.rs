use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use pulsewatch::api::{self, AppState};
use pulsewatch::{Config, Monitor};

#[derive(Parser)]
#[command(name = "pulsewatch")]
#[command(about = "Live telemetry monitor with self-diagnostics and auto-repair", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, run every control loop and serve the HTTP API until Ctrl-C
    Run {
        #[arg(short, long, help = "TOML configuration file")]
        config: Option<PathBuf>,
        #[arg(long, help = "Telemetry endpoint (ws:// or wss://)")]
        url: Option<String>,
        #[arg(short, long, help = "HTTP API port")]
        port: Option<u16>,
    },
    /// Connect, run one diagnostics pass and print it as JSON
    Diagnose {
        #[arg(short, long, help = "TOML configuration file")]
        config: Option<PathBuf>,
        #[arg(long, help = "Telemetry endpoint (ws:// or wss://)")]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, url, port } => {
            let mut config = Config::load(config.as_deref())?;
            if let Some(url) = url {
                config.channel.url = url;
            }
            if let Some(port) = port {
                config.api.port = port;
            }
            run(config).await?
        }
        Commands::Diagnose { config, url } => {
            let mut config = Config::load(config.as_deref())?;
            if let Some(url) = url {
                config.channel.url = url;
            }
            diagnose(config).await?
        }
    }

    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let api_config = config.api.clone();
    let monitor = Arc::new(Monitor::from_config(config)?);

    let state = monitor.start().await;
    log::info!("telemetry channel {}", state.as_str());

    if api_config.enabled {
        let app_state = AppState {
            monitor: monitor.clone(),
        };
        api::serve_until(app_state, api_config.port, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    } else {
        tokio::signal::ctrl_c().await?;
    }

    log::info!("shutting down");
    monitor.shutdown().await;
    Ok(())
}

async fn diagnose(mut config: Config) -> Result<()> {
    config.diagnostics.repair_after_run = false;
    config.channel.max_attempts = 0;

    let monitor = Monitor::from_config(config)?;
    let state = monitor.channel().connect().await;
    log::info!("telemetry channel {}", state.as_str());

    // give the primed systemMetrics request a chance to land
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let subscription = monitor.subscribe_metrics(move |snapshot| {
        let _ = tx.send(snapshot);
    });
    if tokio::time::timeout(monitor.config().channel.ack_timeout(), rx.recv())
        .await
        .is_err()
    {
        log::warn!("no metrics snapshot received; diagnosing without one");
    }
    subscription.unsubscribe();

    let health = monitor.diagnostics().check_health().await;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "connection": state.as_str(),
            "results": monitor.diagnostics().latest_results(),
            "health": &*health,
        }))?
    );

    monitor.shutdown().await;
    Ok(())
}
