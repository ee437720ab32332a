//! Durable append log of vice-blocks, round votes, and tx votes, keyed by
//! `(tip, entry hash)`.
//!
//! Unlike the rest of the finality layer's I/O boundaries, the `Store` is
//! accessed synchronously from inside the controller's core lock: the
//! underlying KV is a local embedded store and its writes are
//! microsecond-scale, so there is no benefit (and real risk of deadlock with
//! the lock order in the concurrency model) in making this surface async.

pub mod memory;
#[cfg(feature = "sled-backend")]
pub mod sled_store;

pub use memory::MemoryStore;
#[cfg(feature = "sled-backend")]
pub use sled_store::SledStore;

use dpos_core::{BlockHash, RoundVoteP2p, TxVoteP2p, ViceBlock, VoteHash};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A 64-byte key: the tip (32 bytes) followed by the entry's own hash (32 bytes).
/// Keeping the tip as the key prefix lets `erase_by_tip` run as a range scan.
pub type StoreKey = [u8; 64];

pub fn key_for(tip: BlockHash, entry_hash: dpos_core::Hash256) -> StoreKey {
    let mut key = [0u8; 64];
    key[0..32].copy_from_slice(tip.0.as_ref());
    key[32..64].copy_from_slice(entry_hash.as_ref());
    key
}

/// A batch of entries to persist atomically, as produced by a single
/// `VoterOutput`. The controller flushes one of these per handled ingress
/// before returning.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    pub vice_blocks: Vec<ViceBlock>,
    pub round_votes: Vec<RoundVoteP2p>,
    pub tx_votes: Vec<TxVoteP2p>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.vice_blocks.is_empty() && self.round_votes.is_empty() && self.tx_votes.is_empty()
    }
}

/// The persisted log. All methods are synchronous: callers already hold
/// whatever lock serializes access to the in-memory `Voter`, and this trait
/// must not introduce its own blocking beyond the backend's local disk I/O.
pub trait Store {
    /// Flushes a batch atomically. Returns only once durable.
    fn write_batch(&mut self, batch: &WriteBatch) -> Result<()>;

    /// Drops every entry keyed under `tip`, from all three tables.
    fn erase_by_tip(&mut self, tip: BlockHash) -> Result<()>;

    fn find_vice_block(&self, tip: BlockHash, hash: BlockHash) -> Result<Option<ViceBlock>>;
    fn find_round_vote(&self, tip: BlockHash, hash: VoteHash) -> Result<Option<RoundVoteP2p>>;
    fn find_tx_vote(&self, tip: BlockHash, hash: VoteHash) -> Result<Option<TxVoteP2p>>;

    /// Full scan at startup, invoking `f` for every persisted vice-block.
    fn load_vice_blocks(&self, f: &mut dyn FnMut(BlockHash, ViceBlock)) -> Result<()>;
    /// Full scan at startup, invoking `f` for every persisted round vote.
    fn load_round_votes(&self, f: &mut dyn FnMut(RoundVoteP2p)) -> Result<()>;
    /// Full scan at startup, invoking `f` for every persisted tx vote.
    fn load_tx_votes(&self, f: &mut dyn FnMut(TxVoteP2p)) -> Result<()>;
}
