// ecowitt_statsd - StatsD and Prometheus metrics bridge for Ecowitt weather gateways
//
// Copyright 2023 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use clap::Parser;
use ecowitt_statsd::client::EcowittClient;
use ecowitt_statsd::config::Config;
use ecowitt_statsd::http::RequestContext;
use ecowitt_statsd::metrics::{FanoutSink, GaugeSink, NoopSink, PrometheusSink, StatsdSink};
use ecowitt_statsd::normalize::Normalizer;
use ecowitt_statsd::scan::Scanner;
use prometheus_client::registry::Registry;
use reqwest::Client;
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{self, SignalKind};
use tokio::sync::oneshot;
use tracing::Level;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_CONFIG_FILE: &str = "/var/lib/ecowitt-statsd/config.json";
const DEFAULT_REFERSH_SECS: u64 = 10;
const PROMETHEUS_PREFIX: &str = "ecowitt";

#[derive(Debug, Parser)]
#[clap(name = "ecowitt_statsd", version = clap::crate_version!())]
struct EcowittStatsdApplication {
    /// Path to the JSON configuration file with the gateway address, StatsD server,
    /// and default tags
    #[clap(long, default_value = DEFAULT_CONFIG_FILE)]
    config_file: PathBuf,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Fetch live data from the gateway at this interval, in seconds. Must be at least 1.
    #[clap(long, default_value_t = DEFAULT_REFERSH_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    refresh_secs: u64,

    /// Timeout for fetching live data from the gateway, in milliseconds. By default,
    /// requests have no timeout beyond that of the underlying connection.
    #[clap(long)]
    timeout_millis: Option<u64>,

    /// Address to expose Prometheus metrics on. By default, metrics are only sent to
    /// StatsD and no HTTP server is started.
    #[clap(long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = EcowittStatsdApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let config = Config::from_path(&opts.config_file).unwrap_or_else(|e| {
        tracing::error!(message = "unable to load configuration", path = %opts.config_file.display(), error = %e);
        process::exit(1)
    });

    let mut builder = Client::builder();
    if let Some(millis) = opts.timeout_millis {
        builder = builder.timeout(Duration::from_millis(millis));
    }

    let http_client = builder.build().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    let client = EcowittClient::new(http_client, &config.host, config.gateway_port()).unwrap_or_else(|e| {
        tracing::error!(message = "invalid gateway address", host = %config.host, port = config.port, error = %e);
        process::exit(1)
    });

    let statsd: Box<dyn GaugeSink> = if config.stats_enabled() {
        match StatsdSink::new(&config.stats_server, config.default_tags.clone()) {
            Ok(s) => {
                tracing::info!(message = "sending metrics to statsd", server = %config.stats_server);
                Box::new(s)
            }
            Err(e) => {
                tracing::error!(message = "error creating statsd client, metrics disabled", server = %config.stats_server, error = %e);
                Box::new(NoopSink)
            }
        }
    } else {
        tracing::info!("no statsd server configured, statsd metrics disabled");
        Box::new(NoopSink)
    };

    let mut sinks = vec![statsd];
    let mut server = None;

    if let Some(bind) = opts.bind {
        let mut registry = Registry::with_prefix(PROMETHEUS_PREFIX);
        sinks.push(Box::new(PrometheusSink::new(&mut registry, &config.default_tags)));

        let context = Arc::new(RequestContext::new(registry));
        let (tx, rx) = oneshot::channel::<()>();
        let builder = axum::Server::try_bind(&bind).unwrap_or_else(|e| {
            tracing::error!(message = "error binding to address", address = %bind, error = %e);
            process::exit(1)
        });

        let http = builder
            .serve(ecowitt_statsd::http::router(context).into_make_service())
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            });

        tracing::info!(message = "server started", address = %bind);
        server = Some((tx, tokio::spawn(http)));
    }

    let normalizer = Normalizer::new(FanoutSink::new(sinks));
    let scanner = Scanner::new(client, normalizer, Duration::from_secs(opts.refresh_secs));
    let handle = scanner.start();

    // Wait for either SIGTERM or SIGINT to shutdown
    tokio::select! {
        _ = sigterm() => {}
        _ = sigint() => {}
    }

    tracing::info!("stopping gateway polling");
    handle.stop();
    handle.wait().await?;

    if let Some((tx, task)) = server {
        let _ = tx.send(());
        task.await??;
        tracing::info!("server shutdown");
    }

    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    unix::signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}
