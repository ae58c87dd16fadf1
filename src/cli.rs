use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::capture::{CaptureMode, LinkLayer};

/// Capture-side forwarding of TCP frames to a remote collector
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log filter (e.g. `debug` or `framefwd=trace`); takes precedence over RUST_LOG
    #[arg(long, global = true)]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Capture frames and forward those addressed to the target port
    Agent(AgentArgs),
    /// Accept agent connections and log the received frames
    Collector(CollectorArgs),
    /// List the interfaces available for capture
    Interfaces,
}

#[derive(clap::Args, Debug, Default)]
pub struct AgentArgs {
    /// Path of the TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Collector address (host:port)
    #[arg(long)]
    pub collector: Option<String>,
    /// TCP destination port of the frames to forward
    #[arg(long)]
    pub target_port: Option<u16>,
    /// Whether captured frames may alias the capture buffer
    #[arg(long, value_enum)]
    pub capture_mode: Option<CaptureMode>,
    /// Header the captured frames start with
    #[arg(long, value_enum)]
    pub link_layer: Option<LinkLayer>,
    /// Do not put the interfaces in promiscuous mode
    #[arg(long)]
    pub no_promiscuous: bool,
    /// Interfaces to capture from
    pub interfaces: Vec<String>,
}

#[derive(clap::Args, Debug, Default)]
pub struct CollectorArgs {
    /// Path of the TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Address to accept agent connections on (host:port)
    #[arg(long)]
    pub listen: Option<String>,
    /// Number of leading payload bytes to log (0 disables the preview)
    #[arg(long)]
    pub payload_preview: Option<usize>,
}

#[cfg(test)]
mod tests {
    use crate::capture::{CaptureMode, LinkLayer};
    use crate::cli::{Args, Command};
    use clap::{CommandFactory, Parser};

    #[test]
    fn test_cli_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_agent() {
        let args = Args::try_parse_from([
            "framefwd",
            "agent",
            "--collector",
            "collector.local:7777",
            "--target-port",
            "30005",
            "--capture-mode",
            "copy",
            "--link-layer",
            "ip",
            "--no-promiscuous",
            "eth0",
            "eth1",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(args.log_level.as_deref(), Some("debug"));
        let Command::Agent(agent) = args.command else {
            panic!("expected the agent command");
        };
        assert_eq!(agent.collector.as_deref(), Some("collector.local:7777"));
        assert_eq!(agent.target_port, Some(30005));
        assert_eq!(agent.capture_mode, Some(CaptureMode::Copy));
        assert_eq!(agent.link_layer, Some(LinkLayer::Ip));
        assert!(agent.no_promiscuous);
        assert_eq!(agent.interfaces, vec!["eth0", "eth1"]);
        assert!(agent.config.is_none());
    }

    #[test]
    fn test_parse_collector() {
        let args = Args::try_parse_from([
            "framefwd",
            "collector",
            "--listen",
            "0.0.0.0:7777",
            "--payload-preview",
            "16",
        ])
        .unwrap();

        assert!(args.log_level.is_none());
        let Command::Collector(collector) = args.command else {
            panic!("expected the collector command");
        };
        assert_eq!(collector.listen.as_deref(), Some("0.0.0.0:7777"));
        assert_eq!(collector.payload_preview, Some(16));
    }

    #[test]
    fn test_reject_invalid_port() {
        assert!(Args::try_parse_from(["framefwd", "agent", "--target-port", "70000"]).is_err());
    }
}
