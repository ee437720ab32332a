use crate::{key_for, Result, Store, StoreError, WriteBatch};
use dpos_core::{BlockHash, RoundVoteP2p, TxVoteP2p, ViceBlock, VoteHash};
use sled::Tree;

/// Durable backend on top of `sled`. Each logical table is its own tree so
/// that `erase_by_tip`'s prefix scan never has to distinguish table kind by
/// key shape.
pub struct SledStore {
    vice_blocks: Tree,
    round_votes: Tree,
    tx_votes: Tree,
}

impl SledStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let db = sled::open(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        Self::from_db(&db)
    }

    fn from_db(db: &sled::Db) -> Result<Self> {
        let open_tree = |name: &str| {
            db.open_tree(name)
                .map_err(|e| StoreError::Backend(e.to_string()))
        };
        Ok(SledStore {
            vice_blocks: open_tree("vice_blocks")?,
            round_votes: open_tree("round_votes")?,
            tx_votes: open_tree("tx_votes")?,
        })
    }

    fn erase_prefix(tree: &Tree, tip: BlockHash) -> Result<()> {
        let prefix: &[u8] = tip.0.as_ref();
        let keys: Vec<_> = tree
            .scan_prefix(prefix)
            .keys()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        for key in keys {
            tree.remove(key)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        Ok(())
    }
}

impl Store for SledStore {
    fn write_batch(&mut self, batch: &WriteBatch) -> Result<()> {
        for block in &batch.vice_blocks {
            let key = key_for(block.prev_block, block.hash().0);
            self.vice_blocks
                .insert(key, bincode::serialize(block)?)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        for rv in &batch.round_votes {
            let key = key_for(rv.tip, rv.hash().0);
            self.round_votes
                .insert(key, bincode::serialize(rv)?)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        for tv in &batch.tx_votes {
            let key = key_for(tv.tip, tv.hash().0);
            self.tx_votes
                .insert(key, bincode::serialize(tv)?)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        self.vice_blocks
            .flush()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.round_votes
            .flush()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.tx_votes
            .flush()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    fn erase_by_tip(&mut self, tip: BlockHash) -> Result<()> {
        Self::erase_prefix(&self.vice_blocks, tip)?;
        Self::erase_prefix(&self.round_votes, tip)?;
        Self::erase_prefix(&self.tx_votes, tip)?;
        Ok(())
    }

    fn find_vice_block(&self, tip: BlockHash, hash: BlockHash) -> Result<Option<ViceBlock>> {
        match self
            .vice_blocks
            .get(key_for(tip, hash.0))
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn find_round_vote(&self, tip: BlockHash, hash: VoteHash) -> Result<Option<RoundVoteP2p>> {
        match self
            .round_votes
            .get(key_for(tip, hash.0))
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn find_tx_vote(&self, tip: BlockHash, hash: VoteHash) -> Result<Option<TxVoteP2p>> {
        match self
            .tx_votes
            .get(key_for(tip, hash.0))
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn load_vice_blocks(&self, f: &mut dyn FnMut(BlockHash, ViceBlock)) -> Result<()> {
        for entry in self.vice_blocks.iter() {
            let (_, bytes) = entry.map_err(|e| StoreError::Backend(e.to_string()))?;
            let block: ViceBlock = bincode::deserialize(&bytes)?;
            f(block.prev_block, block);
        }
        Ok(())
    }

    fn load_round_votes(&self, f: &mut dyn FnMut(RoundVoteP2p)) -> Result<()> {
        for entry in self.round_votes.iter() {
            let (_, bytes) = entry.map_err(|e| StoreError::Backend(e.to_string()))?;
            f(bincode::deserialize(&bytes)?);
        }
        Ok(())
    }

    fn load_tx_votes(&self, f: &mut dyn FnMut(TxVoteP2p)) -> Result<()> {
        for entry in self.tx_votes.iter() {
            let (_, bytes) = entry.map_err(|e| StoreError::Backend(e.to_string()))?;
            f(bincode::deserialize(&bytes)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpos_core::{generate_keypair, Signature, VoteChoice};

    fn round_vote(tip: BlockHash, round: u32) -> RoundVoteP2p {
        let (_, sk) = generate_keypair("voter");
        let mut rv = RoundVoteP2p {
            tip,
            round,
            choice: VoteChoice::yes(dpos_core::Hash256::hash([1u8])),
            signature: Signature::zero(),
        };
        rv.signature = Signature::sign(rv.signing_target(), &sk).unwrap();
        rv
    }

    #[test]
    fn write_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let tip = BlockHash(dpos_core::Hash256::hash([9u8]));
        let rv = round_vote(tip, 1);
        {
            let mut store = SledStore::open(dir.path()).unwrap();
            store
                .write_batch(&WriteBatch {
                    round_votes: vec![rv.clone()],
                    ..Default::default()
                })
                .unwrap();
        }
        let store = SledStore::open(dir.path()).unwrap();
        assert_eq!(store.find_round_vote(tip, rv.hash()).unwrap(), Some(rv));
    }

    #[test]
    fn erase_by_tip_removes_entries() {
        let dir = tempfile::tempdir().unwrap();
        let tip = BlockHash(dpos_core::Hash256::hash([4u8]));
        let rv = round_vote(tip, 1);
        let mut store = SledStore::open(dir.path()).unwrap();
        store
            .write_batch(&WriteBatch {
                round_votes: vec![rv.clone()],
                ..Default::default()
            })
            .unwrap();
        store.erase_by_tip(tip).unwrap();
        assert_eq!(store.find_round_vote(tip, rv.hash()).unwrap(), None);
    }
}
