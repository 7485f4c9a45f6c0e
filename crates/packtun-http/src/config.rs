use std::time::Duration;

use packtun_frame::{Channel, Magic, Packer, Version, DEFAULT_CHUNK_SIZE};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TunnelError};

/// Magic of the HTTP tunnel protocol variant ("HT").
pub const TUNNEL_MAGIC: Magic = *b"HT";

/// Tunnel protocol version.
pub const TUNNEL_VERSION: Version = 1;

/// Response header snapshots.
pub const HEADERS: Channel = 1;

/// Request metadata snapshot.
pub const REQUEST: Channel = 8;

/// Request body (client to server) and response body (server to client).
pub const BODY: Channel = 16;

/// Upper bound on a single request or header snapshot: 1 MiB.
pub const DEFAULT_MAX_SNAPSHOT: u64 = 1024 * 1024;

/// Channel ids used by a tunnel. Both peers must agree; nothing is negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TunnelChannels {
    pub headers: Channel,
    pub request: Channel,
    pub body: Channel,
}

impl Default for TunnelChannels {
    fn default() -> Self {
        Self {
            headers: HEADERS,
            request: REQUEST,
            body: BODY,
        }
    }
}

/// Tunnel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TunnelConfig {
    /// Protocol magic. Default: `"HT"`.
    pub magic: Magic,
    /// Protocol version. Default: 1.
    pub version: Version,
    /// Channel ids. Default: headers 1, request 8, body 16.
    pub channels: TunnelChannels,
    /// Request body chunk size. Default: 4096 bytes.
    pub chunk_size: usize,
    /// Maximum accepted request/header snapshot size. Default: 1 MiB.
    pub max_snapshot_size: u64,
    /// Read deadline for the tunnel's read side, in milliseconds. Default: none.
    pub read_timeout_ms: Option<u64>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            magic: TUNNEL_MAGIC,
            version: TUNNEL_VERSION,
            channels: TunnelChannels::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_snapshot_size: DEFAULT_MAX_SNAPSHOT,
            read_timeout_ms: None,
        }
    }
}

impl TunnelConfig {
    pub fn packer(&self) -> Packer {
        Packer::new(self.magic, self.version)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    /// Reject configurations the tunnel cannot run with.
    pub fn validate(&self) -> Result<()> {
        let TunnelChannels {
            headers,
            request,
            body,
        } = self.channels;
        if headers == request || headers == body || request == body {
            return Err(TunnelError::Config(format!(
                "channel ids must be distinct (headers={headers}, request={request}, body={body})"
            )));
        }
        if self.chunk_size == 0 {
            return Err(TunnelError::Config("chunk_size must be greater than zero".into()));
        }
        if self.max_snapshot_size == 0 {
            return Err(TunnelError::Config(
                "max_snapshot_size must be greater than zero".into(),
            ));
        }
        if self.read_timeout_ms == Some(0) {
            return Err(TunnelError::Config(
                "read_timeout_ms must be greater than zero when set".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_wire_constants() {
        let config = TunnelConfig::default();
        assert_eq!(config.packer(), Packer::new(*b"HT", 1));
        assert_eq!(config.channels.headers, 1);
        assert_eq!(config.channels.request, 8);
        assert_eq!(config.channels.body, 16);
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.read_timeout(), None);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_colliding_channels() {
        let config = TunnelConfig {
            channels: TunnelChannels {
                headers: 3,
                request: 3,
                body: 16,
            },
            ..TunnelConfig::default()
        };
        assert!(matches!(config.validate(), Err(TunnelError::Config(_))));
    }

    #[test]
    fn rejects_zero_sizes() {
        let config = TunnelConfig {
            chunk_size: 0,
            ..TunnelConfig::default()
        };
        assert!(config.validate().is_err());

        let config = TunnelConfig {
            read_timeout_ms: Some(0),
            ..TunnelConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: TunnelConfig =
            serde_json::from_str(r#"{"chunk_size": 512, "read_timeout_ms": 2500}"#).unwrap();
        assert_eq!(config.chunk_size, 512);
        assert_eq!(config.read_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.magic, TUNNEL_MAGIC);
        assert_eq!(config.channels, TunnelChannels::default());
    }

    #[test]
    fn unknown_json_fields_are_rejected() {
        let result = serde_json::from_str::<TunnelConfig>(r#"{"chunk": 512}"#);
        assert!(result.is_err());
    }
}
