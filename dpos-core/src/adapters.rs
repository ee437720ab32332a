//! Capability traits the `Voter` is parametric over, per the source's
//! `CDposVoter::Callbacks` binding: rather than member-function callables
//! bound at construction, these are plain traits injected as trait objects.

use crate::types::{BlockHash, MasternodeId, Transaction, TxId, ViceBlock};
use std::collections::HashSet;

/// Outcome of a validation check, with an optional human-readable reason
/// for rejection (surfaced in logs, never in consensus-visible state).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub ok: bool,
    pub reject_reason: Option<String>,
}

impl ValidationOutcome {
    pub fn accept() -> Self {
        ValidationOutcome {
            ok: true,
            reject_reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        ValidationOutcome {
            ok: false,
            reject_reason: Some(reason.into()),
        }
    }
}

/// Syntactic and semantic validation of transactions and candidate blocks
/// against the current chain state. All I/O and chain-state access happens
/// here; the `Voter` stays purely computational.
pub trait Validator: Send + Sync {
    /// The transaction parses, its inputs exist, and its scripts succeed
    /// against the pre-tip UTXO state.
    fn validate_tx(&self, tx: &Transaction) -> ValidationOutcome;

    /// The block's header, `prevBlock`, timestamp, and commitment to its tx
    /// set are well-formed. If `check_txs` is true, every transaction in the
    /// block must also satisfy `validate_tx`; `known_txs` lets the caller
    /// skip re-validating transactions already known-good.
    fn validate_block(
        &self,
        block: &ViceBlock,
        known_txs: &HashSet<TxId>,
        check_txs: bool,
    ) -> ValidationOutcome;

    /// Whether the chain believes `tip` is deep enough that its dPoS state
    /// may be evicted.
    fn allow_archiving(&self, tip: BlockHash) -> bool;
}

/// Answers "is key K a committee member at height H?" and "what is my
/// operator identity?". Reads the masternode registry maintained elsewhere;
/// this layer never writes to it.
pub trait CommitteeView: Send + Sync {
    /// The committee size at the given tip, or `None` if `tip` is unknown
    /// to the underlying chain.
    fn team_size_at(&self, tip: BlockHash) -> Option<usize>;

    /// Whether `id` is a committee member at `tip`.
    fn is_team_member(&self, tip: BlockHash, id: &MasternodeId) -> bool;

    /// This node's own operator identity, if it runs a masternode.
    fn my_identity(&self) -> Option<MasternodeId>;

    /// Resolves `tip` to a chain height by walking the chain index backward
    /// from the head, or `None` if `tip` is not a recent-enough ancestor.
    fn height_of(&self, tip: BlockHash) -> Option<u64>;

    /// The current height of the underlying chain's head.
    fn chain_height(&self) -> u64;

    /// Whether the underlying chain has finished initial block download.
    /// The controller gates voter activation on this plus a settling delay.
    fn initial_block_download_complete(&self) -> bool;
}
