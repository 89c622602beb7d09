//! # pulse-agent
//!
//! Console controller for the dashboard's WebSocket connections: loads
//! settings, opens every configured socket, prints routed messages, and
//! takes commands on stdin.

#![deny(unsafe_code)]

mod commands;
mod printer;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use pulse_core::constants::{NAME, VERSION};
use pulse_core::logging::{LogFormat, init_subscriber};
use pulse_settings::{
    PulseSettings, RegistrySettings, load_settings_from_path, parse_connection_spec, settings_path,
};
use pulse_sockets::{ConnectionRegistry, LoggingHandler, RegistryOptions, WsConnector};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::commands::{Controller, parse};

/// Dashboard socket console.
#[derive(Parser, Debug)]
#[command(name = "pulse-agent", version, about = "Console controller for dashboard WebSocket connections")]
struct Cli {
    /// Settings file (defaults to `$PULSE_SETTINGS` or `~/.pulse/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level filter (overrides settings; `RUST_LOG` still wins).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,

    /// Connection as `id=url`. Repeatable; replaces the configured list.
    #[arg(long = "connect", value_name = "ID=URL")]
    connect: Vec<String>,
}

impl Cli {
    /// Fold command-line overrides into loaded settings.
    fn apply(&self, settings: &mut PulseSettings) -> Result<()> {
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.format = LogFormat::Json;
        }
        if !self.connect.is_empty() {
            let mut connections = Vec::with_capacity(self.connect.len());
            for spec in &self.connect {
                let Some(config) = parse_connection_spec(spec) else {
                    bail!("invalid --connect value {spec:?}, expected id=url");
                };
                connections.push(config);
            }
            settings.connections = connections;
        }
        Ok(())
    }
}

fn registry_options(settings: &RegistrySettings) -> RegistryOptions {
    RegistryOptions {
        outbound_buffer: settings.outbound_buffer,
        route_capacity: settings.route_capacity,
        status_capacity: settings.status_capacity,
        settle_delay: Duration::from_millis(settings.settle_delay_ms),
    }
}

/// Read commands until `quit`, Ctrl-C, or (after stdin closes) Ctrl-C.
async fn run_console(controller: &Controller) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    tracing::info!("stdin closed, waiting for ctrl-c");
                    tokio::signal::ctrl_c()
                        .await
                        .context("failed to listen for ctrl-c")?;
                    return Ok(());
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse(&line) {
                    Ok(command) => {
                        let reply = controller.execute(&command);
                        println!("{}", reply.text);
                        if reply.quit {
                            return Ok(());
                        }
                    }
                    Err(e) => println!("{e} (try `help`)"),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Settings come first: they carry the log level.
    let path = args.settings.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    args.apply(&mut settings)?;
    settings.validate().context("invalid settings")?;

    init_subscriber(&settings.logging.level, settings.logging.format);
    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install metrics recorder")?;

    let registry = ConnectionRegistry::with_options(
        WsConnector::new().with_inbound_buffer(settings.registry.inbound_buffer),
        LoggingHandler,
        registry_options(&settings.registry),
    );
    let printers = printer::spawn(&registry, settings.connections.iter().map(|c| c.id.clone()));
    registry.configure(settings.connections.clone());

    let controller = Controller::new(registry, Some(metrics));
    tracing::info!(
        name = NAME,
        version = VERSION,
        connections = controller.registry().len(),
        "pulse agent started"
    );
    println!("{}", commands::HELP);
    let result = run_console(&controller).await;

    tracing::info!("shutting down");
    controller.shutdown();
    for printer in printers {
        printer.abort();
    }
    result
}
