//! Per-engine protocol counters

use serde::{Deserialize, Serialize};

/// Counters kept by one engine instance
///
/// Read through `SrcrEngine::stats`. Byte counts are encoded frame sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Queries this node originated
    pub queries_originated: u64,
    /// Query frames broadcast (originated and flushed)
    pub queries_sent: u64,
    pub query_bytes_sent: u64,
    pub queries_received: u64,
    pub query_bytes_received: u64,
    pub replies_sent: u64,
    pub reply_bytes_sent: u64,
    pub replies_received: u64,
    pub reply_bytes_received: u64,
    pub data_sent: u64,
    pub data_forwarded: u64,
    pub data_delivered: u64,
    pub link_errors_sent: u64,
    pub link_errors_received: u64,
    /// Routes newly selected or switched in the Path Cache
    pub routes_selected: u64,
    /// Better routes held back by dampening
    pub switches_dampened: u64,
    /// Cache entries removed by link failures
    pub routes_invalidated: u64,
    /// Inbound frames that could not be decoded
    pub malformed: u64,
    /// Inbound packets dropped for any other reason
    pub dropped: u64,
}

impl EngineStats {
    /// Total control bytes put on the air
    pub fn control_bytes_sent(&self) -> u64 {
        self.query_bytes_sent + self.reply_bytes_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_serialize() {
        let stats = EngineStats {
            queries_sent: 2,
            query_bytes_sent: 62,
            reply_bytes_sent: 55,
            ..Default::default()
        };
        assert_eq!(stats.control_bytes_sent(), 117);

        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"queries_sent\":2"));
        let back: EngineStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stats);
    }
}
