use std::net::SocketAddr;

use clap::Parser;
use log::LevelFilter;

/// Command line and environment configuration of the signaling server.
#[derive(Debug, Clone, Parser)]
#[command(name = "callbridge-signaling-server", version, about)]
pub struct Config {
    /// Address to listen on
    #[arg(default_value = "127.0.0.1:9001", env = "CALLBRIDGE_ADDR")]
    pub address: SocketAddr,

    /// Minimum level of log records that get printed
    #[arg(long, default_value_t = LevelFilter::Info, env = "CALLBRIDGE_LOG_LEVEL")]
    pub log_level: LevelFilter,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_to_local_port_9001() {
        let config = Config::try_parse_from(["callbridge-signaling-server"]).unwrap();
        assert_eq!(config.address, "127.0.0.1:9001".parse().unwrap());
    }

    #[test]
    fn address_and_level_can_be_overridden() {
        let config = Config::try_parse_from([
            "callbridge-signaling-server",
            "0.0.0.0:8080",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(config.address.port(), 8080);
        assert_eq!(config.log_level, LevelFilter::Debug);
    }

    #[test]
    fn invalid_address_is_rejected() {
        assert!(Config::try_parse_from(["callbridge-signaling-server", "not-an-address"]).is_err());
    }
}
