use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct ClientSettings {
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_inference_timeout_ms")]
    pub inference_timeout_ms: u64,
}

fn default_connection_timeout_ms() -> u64 {
    10_000
}

fn default_inference_timeout_ms() -> u64 {
    180_000
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connection_timeout_ms: default_connection_timeout_ms(),
            inference_timeout_ms: default_inference_timeout_ms(),
        }
    }
}

impl ClientSettings {
    pub fn new(connection_timeout_ms: u64, inference_timeout_ms: u64) -> Self {
        Self {
            connection_timeout_ms,
            inference_timeout_ms,
        }
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let settings: ClientSettings =
            serde_json::from_str(r#"{ "connection_timeout_ms": 2500 }"#).unwrap();
        assert_eq!(settings.connection_timeout(), Duration::from_millis(2500));
        assert_eq!(settings.inference_timeout(), Duration::from_secs(180));
    }
}
