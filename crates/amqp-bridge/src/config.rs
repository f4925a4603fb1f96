//! CLI surface and the typed configuration derived from it.

use crate::url::{AmqpUrl, UrlParseError};
use clap::Parser;
use rand::Rng;
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_AMQP_URL: &str = "amqp://127.0.0.1:5672/collectd/telemetry";
const DEFAULT_UNIX_SOCKET_PATH: &str = "/tmp/smartgateway";
const DEFAULT_INET_ADDR: &str = "127.0.0.1:30000";
const DEFAULT_INET_PORT: u16 = 30000;
const DEFAULT_RBC: usize = 5000;
const DEFAULT_RBS: usize = 2048;

#[derive(Parser, Debug)]
#[command(name = "amqp-bridge")]
#[command(about = "Unidirectional AMQP 1.0 to local-gateway bridge")]
#[command(version)]
pub struct Args {
    /// AMQP 1.0 source URL
    #[arg(long = "amqp_url", default_value = DEFAULT_AMQP_URL)]
    pub amqp_url: String,

    /// UNIX domain socket path for the downstream gateway
    #[arg(long = "gw_unix", conflicts_with = "gw_inet")]
    pub gw_unix: Option<Option<String>>,

    /// host[:port] TCP target for the downstream gateway
    #[arg(long = "gw_inet", conflicts_with = "gw_unix")]
    pub gw_inet: Option<Option<String>>,

    /// Outgoing socket writes block instead of dropping on would-block
    #[arg(long = "block")]
    pub block: bool,

    /// Ring buffer slot count
    #[arg(long = "rbc", default_value_t = DEFAULT_RBC)]
    pub rbc: usize,

    /// Ring buffer slot size in bytes
    #[arg(long = "rbs", default_value_t = DEFAULT_RBS)]
    pub rbs: usize,

    /// Seconds between stats prints; 0 disables
    #[arg(long = "stat_period", default_value_t = 0)]
    pub stat_period: u64,

    /// AMQP container id
    #[arg(long = "cid")]
    pub cid: Option<String>,

    /// Exit after N messages; 0 = run forever
    #[arg(long = "count", default_value_t = 0)]
    pub count: u64,

    /// Verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Withhold AMQP credit (backpressure) instead of dropping on a full buffer
    #[arg(long = "amqp_block")]
    pub amqp_block: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid --amqp_url: {0}")]
    Url(#[from] UrlParseError),
    #[error("invalid --gw_inet target: {0}")]
    InetAddr(String),
    #[error("--rbc and --rbs must both be non-zero")]
    ZeroSized,
}

#[derive(Debug, Clone)]
pub enum Gateway {
    Unix(PathBuf),
    Inet { host: String, port: u16 },
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub amqp_url: AmqpUrl,
    pub gateway: Gateway,
    pub block: bool,
    pub rbc: usize,
    pub rbs: usize,
    pub stat_period: u64,
    pub cid: String,
    pub count: u64,
    pub verbose: u8,
    pub amqp_block: bool,
}

impl BridgeConfig {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let amqp_url = AmqpUrl::parse(&args.amqp_url)?;

        let gateway = match (args.gw_unix, args.gw_inet) {
            (Some(path), None) => Gateway::Unix(PathBuf::from(
                path.unwrap_or_else(|| DEFAULT_UNIX_SOCKET_PATH.to_string()),
            )),
            (None, Some(addr)) => {
                let addr = addr.unwrap_or_else(|| DEFAULT_INET_ADDR.to_string());
                parse_inet(&addr)?
            }
            (None, None) => Gateway::Unix(PathBuf::from(DEFAULT_UNIX_SOCKET_PATH)),
            (Some(_), Some(_)) => unreachable!("clap enforces conflicts_with"),
        };

        if args.rbc == 0 || args.rbs == 0 {
            return Err(ConfigError::ZeroSized);
        }

        let cid = args.cid.unwrap_or_else(default_cid);

        Ok(Self {
            amqp_url,
            gateway,
            block: args.block,
            rbc: args.rbc,
            rbs: args.rbs,
            stat_period: args.stat_period,
            cid,
            count: args.count,
            verbose: args.verbose,
            amqp_block: args.amqp_block,
        })
    }
}

/// `--gw_inet`'s grammar is `host[:port]`: the port is independently
/// optional and defaults to [`DEFAULT_INET_PORT`] when omitted.
fn parse_inet(addr: &str) -> Result<Gateway, ConfigError> {
    match addr.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| ConfigError::InetAddr(addr.to_string()))?;
            Ok(Gateway::Inet {
                host: host.to_string(),
                port,
            })
        }
        None => Ok(Gateway::Inet {
            host: addr.to_string(),
            port: DEFAULT_INET_PORT,
        }),
    }
}

/// Matches the original's `bridge-%x` container id pattern: a random hex
/// suffix, not a UUID.
fn default_cid() -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("bridge-{:x}", suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_gateway_is_unix_socket() {
        let args = Args::parse_from(["amqp-bridge"]);
        let cfg = BridgeConfig::from_args(args).unwrap();
        assert!(matches!(cfg.gateway, Gateway::Unix(p) if p == PathBuf::from(DEFAULT_UNIX_SOCKET_PATH)));
    }

    #[test]
    fn gw_inet_parses_host_and_port() {
        let args = Args::parse_from(["amqp-bridge", "--gw_inet", "10.0.0.1:9000"]);
        let cfg = BridgeConfig::from_args(args).unwrap();
        match cfg.gateway {
            Gateway::Inet { host, port } => {
                assert_eq!(host, "10.0.0.1");
                assert_eq!(port, 9000);
            }
            _ => panic!("expected Inet gateway"),
        }
    }

    #[test]
    fn gw_inet_host_only_defaults_port() {
        let args = Args::parse_from(["amqp-bridge", "--gw_inet", "myhost"]);
        let cfg = BridgeConfig::from_args(args).unwrap();
        match cfg.gateway {
            Gateway::Inet { host, port } => {
                assert_eq!(host, "myhost");
                assert_eq!(port, DEFAULT_INET_PORT);
            }
            _ => panic!("expected Inet gateway"),
        }
    }

    #[test]
    fn generated_cid_matches_bridge_prefix() {
        let args = Args::parse_from(["amqp-bridge"]);
        let cfg = BridgeConfig::from_args(args).unwrap();
        assert!(cfg.cid.starts_with("bridge-"));
    }

    #[test]
    fn zero_rbc_is_rejected() {
        let args = Args::parse_from(["amqp-bridge", "--rbc", "0"]);
        assert!(matches!(
            BridgeConfig::from_args(args),
            Err(ConfigError::ZeroSized)
        ));
    }
}
