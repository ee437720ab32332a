use crate::crypto::*;
use crate::types::*;

impl ToHash256 for BlockHash {
    fn to_hash256(&self) -> Hash256 {
        self.0
    }
}

impl ToHash256 for TxId {
    fn to_hash256(&self) -> Hash256 {
        self.0
    }
}

impl ToHash256 for VoteChoice {
    fn to_hash256(&self) -> Hash256 {
        Hash256::hash(bincode::serialize(self).unwrap())
    }
}

impl ToHash256 for RoundVoteP2p {
    fn to_hash256(&self) -> Hash256 {
        self.signing_target()
    }
}

impl ToHash256 for TxVoteP2p {
    fn to_hash256(&self) -> Hash256 {
        self.signing_target()
    }
}

impl ToHash256 for ViceBlock {
    fn to_hash256(&self) -> Hash256 {
        self.hash().0
    }
}

impl ToHash256 for Transaction {
    fn to_hash256(&self) -> Hash256 {
        self.id().0
    }
}
