use crate::{key_for, Result, Store, StoreKey, WriteBatch};
use dpos_core::{BlockHash, RoundVoteP2p, TxVoteP2p, ViceBlock, VoteHash};
use std::collections::BTreeMap;

/// In-memory backend, mainly for tests. Tables are `BTreeMap` rather than
/// `HashMap` so that `erase_by_tip` can collect the candidate keys under a
/// tip's 32-byte prefix with a single ordered range scan instead of a full
/// scan-and-filter, and so that the collect-then-erase split (required to
/// avoid mutating a map mid-iteration) stays cheap.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    vice_blocks: BTreeMap<StoreKey, ViceBlock>,
    round_votes: BTreeMap<StoreKey, RoundVoteP2p>,
    tx_votes: BTreeMap<StoreKey, TxVoteP2p>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn prefix_keys<V>(table: &BTreeMap<StoreKey, V>, tip: BlockHash) -> Vec<StoreKey> {
        let prefix: [u8; 32] = tip.0.as_ref().try_into().expect("hash is 32 bytes");
        table
            .keys()
            .filter(|k| k[0..32] == prefix)
            .copied()
            .collect()
    }
}

impl Store for MemoryStore {
    fn write_batch(&mut self, batch: &WriteBatch) -> Result<()> {
        for block in &batch.vice_blocks {
            let key = key_for(block.prev_block, block.hash().0);
            self.vice_blocks.insert(key, block.clone());
        }
        for rv in &batch.round_votes {
            let key = key_for(rv.tip, rv.hash().0);
            self.round_votes.insert(key, rv.clone());
        }
        for tv in &batch.tx_votes {
            let key = key_for(tv.tip, tv.hash().0);
            self.tx_votes.insert(key, tv.clone());
        }
        Ok(())
    }

    fn erase_by_tip(&mut self, tip: BlockHash) -> Result<()> {
        for key in Self::prefix_keys(&self.vice_blocks, tip) {
            self.vice_blocks.remove(&key);
        }
        for key in Self::prefix_keys(&self.round_votes, tip) {
            self.round_votes.remove(&key);
        }
        for key in Self::prefix_keys(&self.tx_votes, tip) {
            self.tx_votes.remove(&key);
        }
        Ok(())
    }

    fn find_vice_block(&self, tip: BlockHash, hash: BlockHash) -> Result<Option<ViceBlock>> {
        Ok(self.vice_blocks.get(&key_for(tip, hash.0)).cloned())
    }

    fn find_round_vote(&self, tip: BlockHash, hash: VoteHash) -> Result<Option<RoundVoteP2p>> {
        Ok(self.round_votes.get(&key_for(tip, hash.0)).cloned())
    }

    fn find_tx_vote(&self, tip: BlockHash, hash: VoteHash) -> Result<Option<TxVoteP2p>> {
        Ok(self.tx_votes.get(&key_for(tip, hash.0)).cloned())
    }

    fn load_vice_blocks(&self, f: &mut dyn FnMut(BlockHash, ViceBlock)) -> Result<()> {
        for block in self.vice_blocks.values() {
            f(block.prev_block, block.clone());
        }
        Ok(())
    }

    fn load_round_votes(&self, f: &mut dyn FnMut(RoundVoteP2p)) -> Result<()> {
        for rv in self.round_votes.values() {
            f(rv.clone());
        }
        Ok(())
    }

    fn load_tx_votes(&self, f: &mut dyn FnMut(TxVoteP2p)) -> Result<()> {
        for tv in self.tx_votes.values() {
            f(tv.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpos_core::{generate_keypair, Decision, Signature, VoteChoice};

    fn round_vote(tip: BlockHash, round: u32, decision: Decision) -> RoundVoteP2p {
        let (_, sk) = generate_keypair("voter");
        let choice = match decision {
            Decision::Yes => VoteChoice::yes(dpos_core::Hash256::hash([1u8])),
            Decision::No => VoteChoice::no(),
            Decision::Pass => VoteChoice::pass(),
        };
        let mut rv = RoundVoteP2p {
            tip,
            round,
            choice,
            signature: Signature::zero(),
        };
        rv.signature = Signature::sign(rv.signing_target(), &sk).unwrap();
        rv
    }

    #[test]
    fn write_then_find_round_trips() {
        let mut store = MemoryStore::new();
        let tip = BlockHash(dpos_core::Hash256::hash([7u8]));
        let rv = round_vote(tip, 1, Decision::Yes);
        let batch = WriteBatch {
            round_votes: vec![rv.clone()],
            ..Default::default()
        };
        store.write_batch(&batch).unwrap();
        let found = store.find_round_vote(tip, rv.hash()).unwrap();
        assert_eq!(found, Some(rv));
    }

    #[test]
    fn erase_by_tip_drops_only_that_tip() {
        let mut store = MemoryStore::new();
        let tip_a = BlockHash(dpos_core::Hash256::hash([1u8]));
        let tip_b = BlockHash(dpos_core::Hash256::hash([2u8]));
        let rv_a = round_vote(tip_a, 1, Decision::Yes);
        let rv_b = round_vote(tip_b, 1, Decision::Yes);
        store
            .write_batch(&WriteBatch {
                round_votes: vec![rv_a.clone(), rv_b.clone()],
                ..Default::default()
            })
            .unwrap();

        store.erase_by_tip(tip_a).unwrap();

        assert_eq!(store.find_round_vote(tip_a, rv_a.hash()).unwrap(), None);
        assert_eq!(
            store.find_round_vote(tip_b, rv_b.hash()).unwrap(),
            Some(rv_b)
        );
    }

    #[test]
    fn load_round_votes_visits_every_entry() {
        let mut store = MemoryStore::new();
        let tip = BlockHash(dpos_core::Hash256::hash([3u8]));
        let votes = vec![
            round_vote(tip, 1, Decision::Yes),
            round_vote(tip, 1, Decision::No),
        ];
        store
            .write_batch(&WriteBatch {
                round_votes: votes.clone(),
                ..Default::default()
            })
            .unwrap();

        let mut seen = Vec::new();
        store.load_round_votes(&mut |rv| seen.push(rv)).unwrap();
        assert_eq!(seen.len(), 2);
    }
}
