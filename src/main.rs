//! PLD Control - terminal console
//!
//! Opens both serial links, runs the startup status round and then reads
//! operator commands from stdin, one per line. Display events (telemetry,
//! laser summaries, problems, notices) are printed as they arrive.

use anyhow::{Context, Result};
use clap::Parser;
use pld_control::config::{Settings, DEFAULT_CONFIG_PATH};
use pld_control::console::{render_event, Console, Reply};
use pld_control::messages::{DisplayEvent, EventBus, OperatorCommand};
use pld_control::tracing_setup;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};

/// Operator console for the PLD chamber
#[derive(Parser, Debug)]
#[command(name = "pld_control")]
#[command(about = "Motion/gas-flow controller and laser console for a PLD chamber")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Operator log file (overrides the configuration)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Stop the laser automatically this many seconds after each start
    #[arg(long)]
    laser_timer: Option<u64>,

    /// Print telemetry lines as they arrive
    #[arg(long)]
    show_telemetry: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load_from(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    if let Some(path) = args.log_file {
        settings.application.log_file = Some(path);
    }
    if let Some(secs) = args.laser_timer {
        settings.laser_timer.auto_stop_secs = Some(secs);
    }
    settings.validate().context("Invalid configuration")?;

    tracing_setup::init_from_config(&settings)?;
    tracing::info!(name = %settings.application.name, "Starting");

    let events = EventBus::new();
    let printer = tokio::spawn(print_events(events.subscribe(), args.show_telemetry));

    let console = Console::connect(settings, events)
        .await
        .context("Failed to start console")?;
    println!("Operator log: {}", console.log().path().display());

    console.initialize().await;
    println!("Ready. Type 'help' for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<OperatorCommand>() {
            Ok(command) => command,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };
        match console.execute(command).await {
            Reply::Done => {}
            Reply::Text(text) => println!("{text}"),
            Reply::Quit => break,
        }
    }

    if console.store().laser().laser_on {
        let _ = console.laser().stop().await;
    }
    console.shutdown().await;
    printer.abort();
    Ok(())
}

async fn print_events(
    mut events: broadcast::Receiver<DisplayEvent>,
    show_telemetry: bool,
) {
    loop {
        match events.recv().await {
            Ok(DisplayEvent::Telemetry(_)) if !show_telemetry => {}
            Ok(event) => {
                if let Some(text) = render_event(&event) {
                    println!("{text}");
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Display fell behind, events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
