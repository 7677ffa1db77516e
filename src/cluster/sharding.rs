//! Rendezvous (HRW) symbol assignment with sticky hysteresis
//!
//! Every (node, symbol) pair hashes to a deterministic 64-bit weight; the
//! symbol belongs to the live node with the highest weight. The current
//! lease holder gets a small multiplicative bonus so marginal weight
//! differences do not bounce ownership, and the assignment controller
//! additionally enforces a minimum hold time before giving a symbol up.

use sha2::{Digest, Sha256};

/// Deterministic 64-bit weight for a (node, symbol) pair
///
/// First eight bytes (big-endian) of SHA-256 over `node_id ‖ ':' ‖ symbol`.
/// Identical on every peer by construction.
pub fn hrw_weight(node_id: &str, symbol: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(node_id.as_bytes());
    hasher.update(b":");
    hasher.update(symbol.as_bytes());
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Pick the owner for `symbol` among `peers`
///
/// `current_owner` (the live lease holder, if any) has its weight multiplied
/// by `1 + sticky_pct`. Returns `None` for an empty peer list.
pub fn select_owner<'a>(
    symbol: &str,
    peers: &'a [String],
    current_owner: Option<&str>,
    sticky_pct: f64,
) -> Option<&'a str> {
    let weighted = peers.iter().map(|peer| {
        let mut weight = hrw_weight(peer, symbol) as f64;
        if Some(peer.as_str()) == current_owner {
            weight *= 1.0 + sticky_pct;
        }
        (peer.as_str(), weight)
    });
    select_max(weighted)
}

/// Highest-weight entry; ties break to the lexicographically smallest node
/// so every peer resolves them identically.
fn select_max<'a>(weights: impl Iterator<Item = (&'a str, f64)>) -> Option<&'a str> {
    let mut best: Option<(&str, f64)> = None;
    for (node, weight) in weights {
        best = match best {
            None => Some((node, weight)),
            Some((best_node, best_weight)) => {
                if weight > best_weight || (weight == best_weight && node < best_node) {
                    Some((node, weight))
                } else {
                    Some((best_node, best_weight))
                }
            }
        };
    }
    best.map(|(node, _)| node)
}
