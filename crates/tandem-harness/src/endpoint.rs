//! Endpoint - Rendezvous Addresses
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};

/// A `host:port` rendezvous address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Creates an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| HarnessError::InvalidSpec(format!("endpoint '{}' has no port", s)))?;
        if host.is_empty() {
            return Err(HarnessError::InvalidSpec(format!("endpoint '{}' has no host", s)));
        }
        let port = port
            .parse()
            .map_err(|_| HarnessError::InvalidSpec(format!("endpoint '{}' has a bad port", s)))?;
        Ok(Self::new(host, port))
    }
}

/// Parses a comma-separated endpoint list.
pub fn parse_endpoints(list: &str) -> HarnessResult<Vec<Endpoint>> {
    list.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// Joins endpoints with commas.
pub fn join_endpoints(endpoints: &[Endpoint]) -> String {
    endpoints
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_join() {
        let list = parse_endpoints("127.0.0.1:6170, 127.0.0.1:6171").unwrap();
        assert_eq!(list, vec![Endpoint::new("127.0.0.1", 6170), Endpoint::new("127.0.0.1", 6171)]);
        assert_eq!(join_endpoints(&list), "127.0.0.1:6170,127.0.0.1:6171");
    }

    #[test]
    fn test_rejects_bad_endpoints() {
        assert!("localhost".parse::<Endpoint>().is_err());
        assert!(":80".parse::<Endpoint>().is_err());
        assert!("host:99999".parse::<Endpoint>().is_err());
    }
}
