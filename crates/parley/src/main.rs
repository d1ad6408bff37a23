//! # parley
//!
//! Frontend server binary: loads settings, registers the `connector`
//! component and serves WebSocket clients until interrupted.

#![deny(unsafe_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use parley_core::logging::init_subscriber;
use parley_server::handlers::{Connector, default_dictionary};
use parley_server::{ParleyServer, RouteDictionary, RouteTable, metrics};
use parley_settings::ParleySettings;

/// Time allowed for in-flight work after ctrl-c.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Parley frontend server.
#[derive(Parser, Debug)]
#[command(name = "parley", about = "Parley frontend server")]
struct Cli {
    /// JSON settings file (missing file means defaults).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Server type this process serves.
    #[arg(long)]
    server_type: Option<String>,

    /// Log filter, e.g. `info` or `parley_server=debug`.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn load_settings(&self) -> Result<ParleySettings> {
        let settings = match &self.config {
            Some(path) => parley_settings::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => parley_settings::load_settings().context("Failed to load settings")?,
        };
        let settings = self.apply_overrides(settings);
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }

    /// Flags win over file and environment.
    fn apply_overrides(&self, mut settings: ParleySettings) -> ParleySettings {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(server_type) = &self.server_type {
            settings.server.server_type = server_type.to_ascii_lowercase();
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        settings
    }
}

fn build_routes() -> Result<RouteTable> {
    let mut routes = RouteTable::builder();
    routes
        .register_component("connector", &Connector)
        .context("Failed to register connector handlers")?;
    Ok(routes.build())
}

/// Built-in entries, overridden per name by the settings dictionary.
fn build_dictionary(overrides: &BTreeMap<String, u16>) -> Result<RouteDictionary> {
    let mut entries = default_dictionary();
    entries.extend(overrides.iter().map(|(name, code)| (name.clone(), *code)));
    RouteDictionary::from_map(entries).context("Invalid route dictionary")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;
    init_subscriber(&settings.logging.level, settings.logging.format);

    let recorder = metrics::install_recorder().context("Failed to install metrics recorder")?;
    let routes = build_routes()?;
    let dictionary = build_dictionary(&settings.dictionary)?;
    let route_count = routes.len();

    let server = ParleyServer::from_settings(&settings, routes, dictionary).with_metrics(recorder);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;

    tracing::info!(
        server_type = %settings.server.server_type,
        "Parley listening on ws://{addr}/ws ({route_count} routes registered)"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let report = server
        .shutdown_gracefully(vec![handle], Some(SHUTDOWN_TIMEOUT))
        .await;
    tracing::info!(
        sessions_closed = report.sessions_closed,
        timed_out = report.timed_out,
        "Shutdown complete"
    );
    Ok(())
}
