// ================================
// src/error.rs - error types shared by the library
// ================================
use thiserror::Error;

use crate::sim::ActorId;

#[derive(Debug, Error)]
pub enum BrakeError {
    /// The simulator could not be reached. Fatal at startup.
    #[error("cannot connect to simulator at {host}:{port}: {reason}")]
    Connection {
        host: String,
        port: u16,
        reason: String,
    },

    /// No actor could be spawned with the given blueprint.
    #[error("failed to spawn '{blueprint}': {reason}")]
    Spawn { blueprint: String, reason: String },

    #[error("unknown blueprint: {0}")]
    UnknownBlueprint(String),

    #[error("actor {0} does not exist or was already destroyed")]
    ActorNotFound(ActorId),

    /// Raw sensor buffer whose length is not a whole number of samples,
    /// or whose decoded sample count disagrees with the declared one.
    #[error("malformed {kind} payload: {len} bytes with {stride}-byte stride (declared {declared} samples)")]
    MalformedPayload {
        kind: &'static str,
        len: usize,
        stride: usize,
        declared: usize,
    },

    #[error("expected a {expected} payload, got {actual}")]
    PayloadKind {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot read config file: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("cannot encode configuration: {0}")]
    ConfigEncode(#[from] toml::ser::Error),
}

impl BrakeError {
    pub fn malformed(kind: &'static str, len: usize, stride: usize, declared: usize) -> Self {
        Self::MalformedPayload {
            kind,
            len,
            stride,
            declared,
        }
    }
}

pub type Result<T, E = BrakeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_payload_message_names_sizes() {
        let err = BrakeError::malformed("point cloud", 18, 16, 1);
        let msg = err.to_string();
        assert!(msg.contains("point cloud"));
        assert!(msg.contains("18"));
        assert!(msg.contains("16"));
    }

    #[test]
    fn connection_message_names_endpoint() {
        let err = BrakeError::Connection {
            host: "localhost".to_string(),
            port: 2000,
            reason: "refused".to_string(),
        };
        assert!(err.to_string().contains("localhost:2000"));
    }
}
