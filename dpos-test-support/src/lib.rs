//! Fixtures shared by the finality layer's crates: committee/keypair
//! generation, a fixed in-memory `CommitteeView`, and a permissive
//! `Validator`, all intended for unit and integration tests only.

use dpos_core::{
    generate_keypair, BlockHash, CommitteeView, MasternodeId, PrivateKey, PublicKey, Transaction,
    TxId, Validator, ValidationOutcome, ViceBlock,
};
use std::collections::{HashMap, HashSet};
use std::sync::Once;

pub fn setup_test() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// A generated committee member: its id, public key, and private key.
#[derive(Debug, Clone)]
pub struct TestMasternode {
    pub id: MasternodeId,
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

/// Deterministically generates `n` committee members, seeded by index so
/// tests are reproducible.
pub fn generate_committee(n: usize) -> Vec<TestMasternode> {
    (0..n)
        .map(|i| {
            let (public_key, private_key) = generate_keypair(format!("masternode-{i}"));
            TestMasternode {
                id: MasternodeId::from_public_key(&public_key),
                public_key,
                private_key,
            }
        })
        .collect()
}

/// A `CommitteeView` over a fixed committee at a fixed height, for tests
/// that don't exercise reorg or committee-rotation behavior.
pub struct FixedCommitteeView {
    pub members: HashSet<MasternodeId>,
    pub me: Option<MasternodeId>,
    pub height: u64,
    pub ibd_complete: bool,
}

impl FixedCommitteeView {
    pub fn new(members: &[TestMasternode], me: Option<MasternodeId>) -> Self {
        FixedCommitteeView {
            members: members.iter().map(|m| m.id).collect(),
            me,
            height: 1_000,
            ibd_complete: true,
        }
    }
}

impl CommitteeView for FixedCommitteeView {
    fn team_size_at(&self, _tip: BlockHash) -> Option<usize> {
        Some(self.members.len())
    }

    fn is_team_member(&self, _tip: BlockHash, id: &MasternodeId) -> bool {
        self.members.contains(id)
    }

    fn my_identity(&self) -> Option<MasternodeId> {
        self.me
    }

    fn height_of(&self, _tip: BlockHash) -> Option<u64> {
        Some(self.height)
    }

    fn chain_height(&self) -> u64 {
        self.height
    }

    fn initial_block_download_complete(&self) -> bool {
        self.ibd_complete
    }
}

/// Accepts every transaction and block unconditionally.
pub struct PermissiveValidator;

impl Validator for PermissiveValidator {
    fn validate_tx(&self, _tx: &Transaction) -> ValidationOutcome {
        ValidationOutcome::accept()
    }

    fn validate_block(
        &self,
        _block: &ViceBlock,
        _known_txs: &HashSet<TxId>,
        _check_txs: bool,
    ) -> ValidationOutcome {
        ValidationOutcome::accept()
    }

    fn allow_archiving(&self, _tip: BlockHash) -> bool {
        true
    }
}

/// A `Validator` that rejects a fixed set of transactions (and any block
/// that carries one of them, when asked to check).
pub struct RejectingValidator {
    pub rejected: HashMap<TxId, &'static str>,
}

impl RejectingValidator {
    pub fn new(rejected: impl IntoIterator<Item = TxId>) -> Self {
        RejectingValidator {
            rejected: rejected.into_iter().map(|t| (t, "rejected in test")).collect(),
        }
    }
}

impl Validator for RejectingValidator {
    fn validate_tx(&self, tx: &Transaction) -> ValidationOutcome {
        match self.rejected.get(&tx.id()) {
            Some(reason) => ValidationOutcome::reject(*reason),
            None => ValidationOutcome::accept(),
        }
    }

    fn validate_block(
        &self,
        block: &ViceBlock,
        _known_txs: &HashSet<TxId>,
        check_txs: bool,
    ) -> ValidationOutcome {
        if check_txs && block.transactions.iter().any(|t| self.rejected.contains_key(t)) {
            ValidationOutcome::reject("block carries a rejected transaction")
        } else {
            ValidationOutcome::accept()
        }
    }

    fn allow_archiving(&self, _tip: BlockHash) -> bool {
        true
    }
}
