//! Outbound gossip, modeled the way the source's `relayEntity<T>` template
//! and `mapRelay`/`vRelayExpiration` pair do: a generic broadcast keyed by
//! message kind and hash, with a 15-minute expiration window so a hash is
//! not re-announced indefinitely.

use dpos_core::Hash256;
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

const RELAY_EXPIRATION: Duration = Duration::from_secs(15 * 60);

/// The kind of entity being relayed, mirroring the source's `MSG_VICE_BLOCK`
/// / `MSG_ROUND_VOTE` / `MSG_TX_VOTE` inventory tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayKind {
    ViceBlock,
    RoundVote,
    TxVote,
}

/// A network-facing broadcaster the controller hands freshly-accepted or
/// self-emitted entities to. Peer transport itself is out of scope; this is
/// the seam the node binary plugs a real gossip layer into.
pub trait Relay: Send + Sync {
    fn broadcast(&self, kind: RelayKind, hash: Hash256, payload: &[u8]);
}

/// No-op relay for standalone or test deployments.
pub struct NullRelay;

impl Relay for NullRelay {
    fn broadcast(&self, _kind: RelayKind, _hash: Hash256, _payload: &[u8]) {}
}

/// Tracks which hashes have been relayed within the last 15 minutes so a
/// handler can avoid re-announcing an entity it has already broadcast.
pub(crate) struct RelayTracker {
    seen: HashSet<Hash256>,
    expiration: VecDeque<(Instant, Hash256)>,
}

impl RelayTracker {
    pub fn new() -> Self {
        RelayTracker {
            seen: HashSet::new(),
            expiration: VecDeque::new(),
        }
    }

    fn expire(&mut self, now: Instant) {
        while let Some((at, _)) = self.expiration.front() {
            if *at > now {
                break;
            }
            let (_, hash) = self.expiration.pop_front().unwrap();
            self.seen.remove(&hash);
        }
    }

    /// Records `hash` as relayed, returning `true` if this is the first
    /// time it has been seen within the expiration window.
    pub fn mark(&mut self, hash: Hash256, now: Instant) -> bool {
        self.expire(now);
        if self.seen.insert(hash) {
            self.expiration.push_back((now + RELAY_EXPIRATION, hash));
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_mark_is_fresh_second_is_not() {
        let mut tracker = RelayTracker::new();
        let now = Instant::now();
        let hash = Hash256::hash([1u8]);
        assert!(tracker.mark(hash, now));
        assert!(!tracker.mark(hash, now));
    }

    #[test]
    fn entry_expires_after_window() {
        let mut tracker = RelayTracker::new();
        let now = Instant::now();
        let hash = Hash256::hash([2u8]);
        assert!(tracker.mark(hash, now));
        let later = now + RELAY_EXPIRATION + Duration::from_secs(1);
        assert!(tracker.mark(hash, later));
    }
}
