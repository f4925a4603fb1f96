//! Hand-written scanner for AMQP URLs.
//!
//! Grammar: `("amqp"/"amqps") "://" [ user [":" password] "@" ]
//! ( host / "[" ipv6 "]" ) [ ":" port ] [ path ]`.
//!
//! A regex is deliberately avoided: the grammar is simple enough that a
//! scanner reads more clearly and fails predictably on malformed input.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlParseError {
    #[error("missing \"://\" after scheme")]
    MissingScheme,
    #[error("unrecognized scheme (expected amqp or amqps)")]
    UnknownScheme,
    #[error("could not extract host")]
    MissingHost,
    #[error("could not extract address")]
    MissingAddress,
    #[error("unterminated IPv6 literal")]
    UnterminatedBracket,
    #[error("port is not a valid number")]
    InvalidPort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmqpUrl {
    pub tls: bool,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: String,
    pub port: u16,
    pub address: String,
}

const DEFAULT_PORT_AMQP: u16 = 5672;
const DEFAULT_PORT_AMQPS: u16 = 5671;

impl AmqpUrl {
    pub fn parse(input: &str) -> Result<Self, UrlParseError> {
        let (scheme, rest) = input.split_once("://").ok_or(UrlParseError::MissingScheme)?;
        let tls = match scheme {
            "amqp" => false,
            "amqps" => true,
            _ => return Err(UrlParseError::UnknownScheme),
        };

        // Split off [user[:password]@] from the front.
        let (userinfo, rest) = match rest.find('@') {
            Some(at) => (Some(&rest[..at]), &rest[at + 1..]),
            None => (None, rest),
        };
        let (user, password) = match userinfo {
            Some(u) => match u.split_once(':') {
                Some((u, p)) => (Some(u.to_string()), Some(p.to_string())),
                None => (Some(u.to_string()), None),
            },
            None => (None, None),
        };

        // host-or-bracketed-ipv6, then optional :port, then optional /path.
        let (host, rest) = if let Some(after_bracket) = rest.strip_prefix('[') {
            let end = scan_bracketed_host(after_bracket)?;
            (after_bracket[..end].to_string(), &after_bracket[end + 1..])
        } else {
            let end = rest
                .find([':', '/'])
                .unwrap_or(rest.len());
            (rest[..end].to_string(), &rest[end..])
        };
        if host.is_empty() {
            return Err(UrlParseError::MissingHost);
        }

        let (port_str, rest) = if let Some(stripped) = rest.strip_prefix(':') {
            let end = stripped.find('/').unwrap_or(stripped.len());
            (Some(&stripped[..end]), &stripped[end..])
        } else {
            (None, rest)
        };
        let port = match port_str {
            Some(p) => p.parse::<u16>().map_err(|_| UrlParseError::InvalidPort)?,
            None => default_port(tls),
        };

        if rest.is_empty() {
            return Err(UrlParseError::MissingAddress);
        }
        let address = rest.to_string();

        Ok(Self {
            tls,
            user,
            password,
            host,
            port,
            address,
        })
    }
}

fn default_port(tls: bool) -> u16 {
    if tls {
        DEFAULT_PORT_AMQPS
    } else {
        DEFAULT_PORT_AMQP
    }
}

/// Finds the index of the closing `]` in `s` (the text after the opening
/// `[`). A `/` encountered before the closing bracket means a path segment
/// has bled into what should be a pure IPv6 literal: that is rejected here
/// rather than silently accepted, even though full IPv6 syntax is never
/// validated.
fn scan_bracketed_host(s: &str) -> Result<usize, UrlParseError> {
    for (i, c) in s.char_indices() {
        match c {
            ']' => return Ok(i),
            '/' => return Err(UrlParseError::UnterminatedBracket),
            _ => {}
        }
    }
    Err(UrlParseError::UnterminatedBracket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipv6_literal_with_userinfo() {
        let url = AmqpUrl::parse("amqp://u:p@[fe80::1]:5672/q").unwrap();
        assert_eq!(url.user.as_deref(), Some("u"));
        assert_eq!(url.password.as_deref(), Some("p"));
        assert_eq!(url.host, "fe80::1");
        assert_eq!(url.port, 5672);
        assert_eq!(url.address, "/q");
        assert!(!url.tls);
    }

    #[test]
    fn rejects_path_bleeding_into_bracket() {
        let err = AmqpUrl::parse("amqp://u:p@[XXX.666/64]:5666/x").unwrap_err();
        assert_eq!(err, UrlParseError::UnterminatedBracket);
    }

    #[test]
    fn defaults_for_plain_host() {
        let url = AmqpUrl::parse("amqp://127.0.0.1/collectd/telemetry").unwrap();
        assert_eq!(url.host, "127.0.0.1");
        assert_eq!(url.port, 5672);
        assert_eq!(url.address, "/collectd/telemetry");
    }

    #[test]
    fn amqps_defaults_to_5671() {
        let url = AmqpUrl::parse("amqps://example.org/addr").unwrap();
        assert_eq!(url.port, 5671);
    }

    #[test]
    fn missing_address_fails() {
        assert_eq!(
            AmqpUrl::parse("amqp://127.0.0.1").unwrap_err(),
            UrlParseError::MissingAddress
        );
    }

    #[test]
    fn missing_host_fails() {
        assert_eq!(
            AmqpUrl::parse("amqp:///addr").unwrap_err(),
            UrlParseError::MissingHost
        );
    }

    #[test]
    fn unknown_scheme_fails() {
        assert!(matches!(
            AmqpUrl::parse("http://127.0.0.1/addr"),
            Err(UrlParseError::UnknownScheme)
        ));
    }
}
