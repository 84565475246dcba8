use crate::error::ProtocolError;
use std::fmt;
use std::str::FromStr;

/// Default TCP port of the AI server.
pub const DEFAULT_PORT: u16 = 8778;

/// AI server TCP/IP address, parsed from `"host[:port]"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerAddress {
    host: String,
    port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for ServerAddress {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = match s.split_once(':') {
            None => (s, DEFAULT_PORT),
            Some((host, port)) => {
                let port = port
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| ProtocolError::InvalidAddress(s.to_string()))?;
                (host, port)
            }
        };

        if host.is_empty() {
            return Err(ProtocolError::InvalidAddress(s.to_string()));
        }

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
