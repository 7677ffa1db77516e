//! Cache key layout
//!
//! Every key the service reads or writes, in one place. The `nt:` prefix
//! covers coordination keys; reports live under `report:`.

/// Sorted set of recently seen nodes, scored by last-seen epoch seconds
pub const NODES_SEEN: &str = "nt:nodes_seen";

/// Membership record, JSON with a 5 s TTL
pub fn node_key(node_id: &str) -> String {
    format!("nt:node:{node_id}")
}

/// Pattern matching every membership record
pub const NODE_KEY_PATTERN: &str = "nt:node:*";

/// Writer lease holder for a symbol
pub fn writer_key(symbol: &str) -> String {
    format!("report:writer:{symbol}")
}

/// Monotonic fencing token counter for a symbol
pub fn writer_token_key(symbol: &str) -> String {
    format!("report:writer:token:{symbol}")
}

/// Published report document
pub fn report_key(symbol: &str) -> String {
    format!("report:{symbol}")
}

/// Overflow document for oversized reports
pub fn report_heavy_key(symbol: &str) -> String {
    format!("report:{symbol}:heavy")
}

/// Raw event mirror stream (only written with NT_ENABLE_STREAMS)
pub fn events_stream_key(symbol: &str) -> String {
    format!("nt:events:{symbol}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shapes() {
        assert_eq!(node_key("n1"), "nt:node:n1");
        assert_eq!(writer_key("BTCUSDT"), "report:writer:BTCUSDT");
        assert_eq!(writer_token_key("BTCUSDT"), "report:writer:token:BTCUSDT");
        assert_eq!(report_key("BTCUSDT"), "report:BTCUSDT");
        assert_eq!(report_heavy_key("BTCUSDT"), "report:BTCUSDT:heavy");
        assert_eq!(events_stream_key("BTCUSDT"), "nt:events:BTCUSDT");
    }
}
