//! Per-node settings. Loaded from JSON, overridden by the binary's flags.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::transport::NodeId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Unique identity of the node; also the tie-break key.
    pub id: NodeId,
    /// Bound on waiting for deferred replies. `None` waits forever.
    pub quorum_timeout_ms: Option<u64>,
    /// How long the demo workload stays in the critical section.
    pub hold_ms: u64,
    /// Delay before first entering WANTED.
    pub start_delay_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: NodeId::from("node0"),
            quorum_timeout_ms: None,
            hold_ms: 5_000,
            start_delay_ms: 0,
        }
    }
}

impl NodeConfig {
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn quorum_timeout(&self) -> Option<Duration> {
        self.quorum_timeout_ms.map(Duration::from_millis)
    }

    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::NodeConfig;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn missing_fields_take_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "id": "b", "quorum_timeout_ms": 250 }}"#).unwrap();

        let cfg = NodeConfig::from_file(file.path()).unwrap();
        assert_eq!(cfg.id.as_str(), "b");
        assert_eq!(cfg.quorum_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(cfg.hold(), Duration::from_secs(5));
        assert_eq!(cfg.start_delay(), Duration::ZERO);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            NodeConfig::from_file(file.path()),
            Err(crate::Error::Json(_))
        ));
    }
}
