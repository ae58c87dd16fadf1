mod capture;
mod cli;
mod config;
mod error;
mod forward;
mod frames;

use crate::capture::datalink::{list_interfaces, DatalinkSource};
use crate::cli::{AgentArgs, Args, CollectorArgs, Command};
use crate::config::{AgentConfig, CollectorConfig};
use crate::error::Error;
use crate::forward::client::ForwardingClient;
use crate::forward::consumer::LogSink;
use crate::forward::receive::Collector;
use crate::forward::send::forward;
use crate::forward::transport::TcpConnector;
use crate::frames::filter::FrameFilter;
use clap::Parser;
use std::process;
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    let result = match args.command {
        Command::Agent(agent) => run_agent(&agent).await,
        Command::Collector(collector) => run_collector(&collector).await,
        Command::Interfaces => {
            print_interfaces();
            Ok(())
        }
    };

    match result {
        // a capture read may still be blocking a runtime thread: do not wait for it
        Ok(()) => process::exit(0),
        Err(e) => {
            error!(error = %e, "terminating");
            process::exit(1);
        }
    }
}

fn init_tracing(log_level: Option<&str>) {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(log_level))
        .init();
}

/// The command line filter wins over RUST_LOG; anything invalid falls back to `info`.
fn log_filter(log_level: Option<&str>) -> EnvFilter {
    match log_level {
        Some(directives) => EnvFilter::try_new(directives).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    }
    .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Forwards captured frames until the capture fails or the process is interrupted.
async fn run_agent(args: &AgentArgs) -> Result<(), Error> {
    let config = AgentConfig::load(args)?;
    let mut source = DatalinkSource::open(&config.interfaces, &config.capture)?;
    let filter = FrameFilter::new(config.target_port, config.capture.link_layer);
    let connector = TcpConnector::new(
        config.collector.clone(),
        config.reconnect.connect_timeout(),
    );
    let mut client = ForwardingClient::new(connector, &config.reconnect);
    let stats = client.stats_handle();

    info!(
        collector = %config.collector,
        target_port = config.target_port,
        interfaces = ?config.interfaces,
        "forwarding frames"
    );

    let mut forwarding = tokio::spawn(async move {
        let end = forward(&mut source, &filter, &mut client).await;
        (end, client.state())
    });

    let result = tokio::select! {
        joined = &mut forwarding => {
            let (end, state) = joined?;
            debug!(?state, "capture ended");
            Err(Error::Capture(end))
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            Ok(())
        }
    };

    let stats = stats.snapshot();
    info!(
        sent = stats.sent,
        dropped = stats.dropped,
        connections = stats.connections,
        "forwarding stopped"
    );
    result
}

/// Serves agent connections until the process is interrupted.
async fn run_collector(args: &CollectorArgs) -> Result<(), Error> {
    let config = CollectorConfig::load(args)?;
    let consumer = Arc::new(LogSink::new(config.payload_preview));
    let collector = Collector::bind(&config.listen, consumer).await?;
    if let Ok(address) = collector.local_addr() {
        info!(%address, "collector listening");
    }

    tokio::select! {
        () = collector.run() => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }
    Ok(())
}

fn print_interfaces() {
    for interface in list_interfaces() {
        let addresses: Vec<String> = interface.ips.iter().map(ToString::to_string).collect();
        let state = if interface.is_up() { "up" } else { "down" };
        println!("{} ({state}): {}", interface.name, addresses.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use crate::log_filter;

    #[test]
    fn test_log_filter_from_command_line() {
        assert_eq!(log_filter(Some("debug")).to_string(), "debug");
        assert_eq!(
            log_filter(Some("framefwd=trace")).to_string(),
            "framefwd=trace"
        );
    }

    #[test]
    fn test_invalid_log_filter_falls_back_to_info() {
        assert_eq!(log_filter(Some("framefwd=loud")).to_string(), "info");
    }
}
