use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// Relay, an OpenAI-compatible inference gateway.
#[derive(Debug, Parser)]
#[command(name = "relay", version)]
pub(crate) struct Args {
    /// Path to the relay.toml configuration file.
    #[arg(short, long, env = "RELAY_CONFIG", default_value = "relay.toml")]
    pub config: PathBuf,

    /// Listen address override, e.g. 0.0.0.0:8000.
    #[arg(short, long, env = "RELAY_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Log filter, e.g. "info" or "server=debug,engine=debug".
    #[arg(long, env = "RELAY_LOG", default_value = "info")]
    pub log: String,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn arguments_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let args = Args::parse_from(["relay"]);

        assert_eq!(args.config, PathBuf::from("relay.toml"));
        assert_eq!(args.log, "info");
        assert!(args.listen.is_none());
    }
}
