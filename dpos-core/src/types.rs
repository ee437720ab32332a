use crate::crypto::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A voting round for a single tip. Round 0 means "no round yet".
pub type Round = u32;

/// Hash of the last finalized block; the anchor all voting is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHash(pub Hash256);

/// Identifier of a transaction, opaque to the finality layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(pub Hash256);

/// Identifier of a signed vote (round vote or tx vote), used for dedup and relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoteHash(pub Hash256);

/// Identifier of a committee member ("masternode"), derived from its operator public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MasternodeId(pub Hash256);

impl MasternodeId {
    pub fn from_public_key(key: &PublicKey) -> Self {
        MasternodeId(Hash256::hash(key.as_ref()))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MasternodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A vote's decision on its subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Decision {
    Yes,
    No,
    Pass,
}

/// A single choice cast within a vote: a decision paired with its subject.
///
/// For a round vote, `subject` is a vice-block hash (or `BlockHash::zero()` for No/Pass).
/// For a tx vote, `subject` is a `TxId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VoteChoice {
    pub decision: Decision,
    pub subject: Hash256,
}

impl VoteChoice {
    pub fn yes(subject: Hash256) -> Self {
        VoteChoice {
            decision: Decision::Yes,
            subject,
        }
    }

    pub fn no() -> Self {
        VoteChoice {
            decision: Decision::No,
            subject: Hash256::zero(),
        }
    }

    pub fn pass() -> Self {
        VoteChoice {
            decision: Decision::Pass,
            subject: Hash256::zero(),
        }
    }
}

/// A committee member's round vote, after signature recovery and committee-membership
/// verification. This is the form the `Voter` operates on internally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundVote {
    pub tip: BlockHash,
    pub voter: MasternodeId,
    pub round: Round,
    pub choice: VoteChoice,
}

/// A committee member's tx vote, after signature recovery and committee-membership
/// verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxVote {
    pub tip: BlockHash,
    pub voter: MasternodeId,
    pub round: Round,
    pub choice: VoteChoice,
}

/// The wire form of a round vote: unsigned by `MasternodeId`, signed with a
/// recoverable signature whose signer must be recovered and checked against
/// the committee at `tip`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundVoteP2p {
    pub tip: BlockHash,
    pub round: Round,
    pub choice: VoteChoice,
    pub signature: Signature,
}

/// The wire form of a tx vote. A single message may batch several choices
/// (one per transaction) cast by the same voter in the same round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxVoteP2p {
    pub tip: BlockHash,
    pub round: Round,
    pub choices: Vec<VoteChoice>,
    pub signature: Signature,
}

impl RoundVoteP2p {
    /// The canonical serialization that the signature covers (everything but the signature).
    pub fn signing_target(&self) -> Hash256 {
        Hash256::hash(bincode::serialize(&(self.tip, self.round, self.choice)).unwrap())
    }

    pub fn hash(&self) -> VoteHash {
        VoteHash(Hash256::hash(bincode::serialize(self).unwrap()))
    }
}

impl TxVoteP2p {
    pub fn signing_target(&self) -> Hash256 {
        Hash256::hash(bincode::serialize(&(self.tip, self.round, &self.choices)).unwrap())
    }

    pub fn hash(&self) -> VoteHash {
        VoteHash(Hash256::hash(bincode::serialize(self).unwrap()))
    }
}

/// A candidate block extending the tip, subject to finality voting.
///
/// The dPoS core treats a block's body opaquely beyond the set of transaction
/// ids it commits to; full block validity (header, commitments, scripts) is
/// the `Validator`'s job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViceBlock {
    pub prev_block: BlockHash,
    pub transactions: Vec<TxId>,
    /// Opaque serialized block payload (header + body), passed through to
    /// the `Validator` and, on finalization, to the external chain processor.
    pub payload: Vec<u8>,
}

impl ViceBlock {
    pub fn hash(&self) -> BlockHash {
        BlockHash(Hash256::hash(bincode::serialize(self).unwrap()))
    }
}

/// A transaction, opaque to the finality layer beyond its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub payload: Vec<u8>,
}

impl Transaction {
    pub fn id(&self) -> TxId {
        TxId(Hash256::hash(&self.payload))
    }
}

/// A finalized block ready for submission to the external chain processor:
/// a vice-block plus the quorum of YES signatures harvested for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockToSubmit {
    pub block: ViceBlock,
    pub round: Round,
    pub signatures: Vec<Signature>,
}
