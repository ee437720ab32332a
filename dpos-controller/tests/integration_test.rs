//! Controller-level scenarios from the finality layer's end-to-end test
//! matrix: unlike `dpos-voter`'s unit tests, these exercise signing,
//! persistence through a real `Store`, relay tracking, and block
//! submission through the public `Controller` API.

use dpos_controller::{Controller, NullRelay, Relay, RelayKind};
use dpos_core::{
    BlockHash, BlockToSubmit, ConsensusParams, Hash256, Signature, Transaction, ViceBlock,
};
use dpos_store::MemoryStore;
use dpos_test_support::{generate_committee, setup_test, FixedCommitteeView, PermissiveValidator};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn params() -> ConsensusParams {
    ConsensusParams {
        team_size: 4,
        min_quorum: 3,
        max_not_voted_txs_to_keep: 100,
        max_tx_votes_from_voter: 100,
        polling_period_secs: 10,
        stalemate_timeout_secs: 30,
        delay_ibd_secs: 0,
    }
}

#[derive(Clone, Default)]
struct RecordingSubmitter {
    submitted: Arc<Mutex<Vec<BlockToSubmit>>>,
}

impl dpos_controller::BlockSubmitter for RecordingSubmitter {
    fn submit(&self, block: &BlockToSubmit) -> bool {
        self.submitted.lock().unwrap().push(block.clone());
        true
    }
}

#[derive(Default)]
struct RecordingRelay {
    broadcast: Mutex<Vec<(RelayKind, Hash256)>>,
}

impl Relay for RecordingRelay {
    fn broadcast(&self, kind: RelayKind, hash: Hash256, _payload: &[u8]) {
        self.broadcast.lock().unwrap().push((kind, hash));
    }
}

struct SharedRelay(Arc<RecordingRelay>);

impl Relay for SharedRelay {
    fn broadcast(&self, kind: RelayKind, hash: Hash256, payload: &[u8]) {
        self.0.broadcast(kind, hash, payload);
    }
}

fn genesis_tip() -> BlockHash {
    BlockHash(Hash256::hash("genesis"))
}

/// S1: four voters, quorum 3. Each signs and relays its round/tx votes;
/// the controller harvests three YES signatures and submits the block.
#[test]
fn happy_path_signs_persists_and_submits() {
    setup_test();
    let committee = generate_committee(4);
    let me = committee[0].clone();
    let tip = genesis_tip();

    let submitter = RecordingSubmitter::default();
    let relay = Arc::new(RecordingRelay::default());
    let controller = Controller::new(
        Box::new(FixedCommitteeView::new(&committee, Some(me.id))),
        Box::new(PermissiveValidator),
        Box::new(MemoryStore::new()),
        Box::new(SharedRelay(Arc::clone(&relay))),
        Box::new(submitter.clone()),
        Some(me.private_key.clone()),
        params(),
    )
    .unwrap();
    controller.run_tick(Instant::now());

    controller.on_chain_tip_updated(tip);

    let tx = Transaction { payload: vec![1, 2, 3] };
    let txid = tx.id();
    let block = ViceBlock {
        prev_block: tip,
        transactions: vec![txid],
        payload: vec![9],
    };
    controller.proceed_vice_block(block.clone()).unwrap();
    controller.proceed_transaction(tx).unwrap();

    // two more voters cast YES tx- and round-votes directly, signed with
    // their own keys, reaching the quorum of 3 alongside the local voter's
    for peer in &committee[1..3] {
        controller
            .proceed_tx_vote(sign_tx_vote(tip, 1, txid.0, peer))
            .unwrap();
        let p2p = sign_round_vote(tip, 1, block.hash(), peer);
        controller.proceed_round_vote(p2p).unwrap();
    }

    assert!(controller.is_committed_tx(txid));
    assert_eq!(controller.list_committed_txs(), vec![txid]);
    assert_eq!(submitter.submitted.lock().unwrap().len(), 1);
    assert!(!relay.broadcast.lock().unwrap().is_empty());
}

/// S3: a second, conflicting round vote from the same signer in the same
/// round is rejected; the store retains only the first.
#[test]
fn equivocating_vote_is_rejected_and_not_persisted() {
    setup_test();
    let committee = generate_committee(4);
    let tip = genesis_tip();
    let store = MemoryStore::new();

    let controller = Controller::new(
        Box::new(FixedCommitteeView::new(&committee, None)),
        Box::new(PermissiveValidator),
        Box::new(store),
        Box::new(NullRelay),
        Box::new(dpos_controller::AcceptingSubmitter),
        None,
        params(),
    )
    .unwrap();
    controller.run_tick(Instant::now());
    controller.on_chain_tip_updated(tip);

    let b1 = Hash256::hash([1u8]);
    let b2 = Hash256::hash([2u8]);
    let peer = &committee[1];

    controller
        .proceed_round_vote(sign_round_vote(tip, 1, BlockHash(b1), peer))
        .unwrap();
    controller
        .proceed_round_vote(sign_round_vote(tip, 1, BlockHash(b2), peer))
        .unwrap();

    assert_eq!(controller.list_round_votes().len(), 1);
}

/// S6: votes accepted before "restart" are all recoverable through the
/// query API a late peer would use, and `load_from_store` reconstructs an
/// equal in-memory set from the durable log.
#[test]
fn late_peer_queries_see_the_persisted_set() {
    setup_test();
    let committee = generate_committee(4);
    let tip = genesis_tip();
    let store = MemoryStore::new();

    let controller = Controller::new(
        Box::new(FixedCommitteeView::new(&committee, None)),
        Box::new(PermissiveValidator),
        Box::new(store),
        Box::new(NullRelay),
        Box::new(dpos_controller::AcceptingSubmitter),
        None,
        params(),
    )
    .unwrap();
    controller.run_tick(Instant::now());
    controller.on_chain_tip_updated(tip);
    controller
        .proceed_round_vote(sign_round_vote(tip, 1, BlockHash(Hash256::hash([3u8])), &committee[0]))
        .unwrap();

    assert_eq!(controller.list_round_votes().len(), 1);
    assert!(controller.find_round_vote(controller.list_round_votes()[0].hash()).is_some());
}

/// Re-delivering an identical p2p vote does not error and leaves the
/// accepted set unchanged.
#[test]
fn duplicate_ingress_is_idempotent() {
    setup_test();
    let committee = generate_committee(4);
    let tip = genesis_tip();

    let controller = Controller::new(
        Box::new(FixedCommitteeView::new(&committee, None)),
        Box::new(PermissiveValidator),
        Box::new(MemoryStore::new()),
        Box::new(NullRelay),
        Box::new(dpos_controller::AcceptingSubmitter),
        None,
        params(),
    )
    .unwrap();
    controller.run_tick(Instant::now());
    controller.on_chain_tip_updated(tip);

    let vote = sign_round_vote(tip, 1, BlockHash(Hash256::hash([4u8])), &committee[0]);
    controller.proceed_round_vote(vote.clone()).unwrap();
    controller.proceed_round_vote(vote).unwrap();
    assert_eq!(controller.list_round_votes().len(), 1);
}

/// A stalled round escapes via `on_round_too_long`, advancing the round
/// without declaring a commitment.
#[test]
fn stalled_round_advances_via_timeout() {
    setup_test();
    let committee = generate_committee(4);
    let me = committee[0].clone();
    let tip = genesis_tip();

    let controller = Controller::new(
        Box::new(FixedCommitteeView::new(&committee, Some(me.id))),
        Box::new(PermissiveValidator),
        Box::new(MemoryStore::new()),
        Box::new(NullRelay),
        Box::new(dpos_controller::AcceptingSubmitter),
        Some(me.private_key.clone()),
        params(),
    )
    .unwrap();
    controller.run_tick(Instant::now());
    controller.on_chain_tip_updated(tip);

    controller
        .proceed_round_vote(sign_round_vote(tip, 1, BlockHash(Hash256::hash([5u8])), &committee[1]))
        .unwrap();
    controller
        .proceed_round_vote(sign_round_vote(tip, 1, BlockHash(Hash256::hash([6u8])), &committee[2]))
        .unwrap();

    assert_eq!(controller.get_current_voting_round(), 1);
    let now = Instant::now() + Duration::from_secs(31);
    controller.run_tick(now);
    assert_eq!(controller.get_current_voting_round(), 2);
}

fn sign_round_vote(
    tip: BlockHash,
    round: u32,
    subject: BlockHash,
    signer: &dpos_test_support::TestMasternode,
) -> dpos_core::RoundVoteP2p {
    let mut p2p = dpos_core::RoundVoteP2p {
        tip,
        round,
        choice: dpos_core::VoteChoice::yes(subject.0),
        signature: Signature::zero(),
    };
    p2p.signature = Signature::sign(p2p.signing_target(), &signer.private_key).unwrap();
    p2p
}

fn sign_tx_vote(
    tip: BlockHash,
    round: u32,
    subject: Hash256,
    signer: &dpos_test_support::TestMasternode,
) -> dpos_core::TxVoteP2p {
    let mut p2p = dpos_core::TxVoteP2p {
        tip,
        round,
        choices: vec![dpos_core::VoteChoice::yes(subject)],
        signature: Signature::zero(),
    };
    p2p.signature = Signature::sign(p2p.signing_target(), &signer.private_key).unwrap();
    p2p
}
