//! Unidirectional AMQP 1.0 to local-gateway bridge.
//!
//! Ingests messages from an AMQP 1.0 source, buffers the payload bytes in a
//! bounded SPSC ring ([`bridge_ring`]), and forwards them to a downstream
//! gateway over a UNIX-domain or TCP socket. The ring decouples the AMQP
//! credit-flow loop from a slow or bursty downstream consumer.

pub mod backoff;
pub mod config;
pub mod receiver;
pub mod sender;
pub mod stats;
pub mod supervisor;
pub mod url;

pub use config::{Args, BridgeConfig, ConfigError, Gateway};
pub use stats::{Snapshot, Stats};
pub use url::{AmqpUrl, UrlParseError};
