//! Single-threaded event loop driving the `Voter` from peer and chain
//! inputs, under one lock (`cs_dpos` in the source). The lock is taken by
//! every `proceed*` ingress handler and by the periodic tick; no Voter
//! operation is ever entered concurrently.

mod relay;
mod submitter;

pub use relay::{NullRelay, Relay, RelayKind};
pub use submitter::{AcceptingSubmitter, BlockSubmitter};

use dpos_core::{
    BlockHash, BlockToSubmit, CommitteeView, ConfigError, ConsensusParams, Decision,
    MasternodeId, PrivateKey, Round, RoundVote, RoundVoteP2p, Transaction, TxId, TxVote,
    TxVoteP2p, Validator, ViceBlock, VoteHash,
};
use dpos_store::{Store, WriteBatch};
use dpos_voter::{Voter, VoterOutput};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("store error: {0}")]
    Store(#[from] dpos_store::StoreError),
    #[error("min_quorum/team_size misconfigured: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, ControllerError>;

/// Something the controller decided to broadcast, produced while `inner`
/// was locked and sent to the relay after the lock is released.
struct PendingRelay {
    kind: RelayKind,
    hash: dpos_core::Hash256,
    payload: Vec<u8>,
}

struct Inner {
    voter: Voter,
    store: Box<dyn Store + Send>,
    received_round_votes: HashMap<VoteHash, RoundVoteP2p>,
    received_tx_votes: HashMap<VoteHash, TxVoteP2p>,
    received_vice_blocks: HashMap<BlockHash, ViceBlock>,
    relay_tracker: relay::RelayTracker,
    ready: bool,
    ibd_complete_since: Option<Instant>,
    last_round: Round,
    round_advanced_at: Instant,
}

/// Drives the finality voter from chain and peer inputs: authenticates
/// ingress, signs and persists outputs, relays them, and hands finalized
/// blocks to the external chain processor.
pub struct Controller {
    inner: Mutex<Inner>,
    committee: Box<dyn CommitteeView>,
    relay: Box<dyn Relay>,
    submitter: Box<dyn BlockSubmitter>,
    operator_key: Option<PrivateKey>,
    params: ConsensusParams,
}

impl Controller {
    pub fn new(
        committee: Box<dyn CommitteeView>,
        validator: Box<dyn Validator>,
        store: Box<dyn Store + Send>,
        relay: Box<dyn Relay>,
        submitter: Box<dyn BlockSubmitter>,
        operator_key: Option<PrivateKey>,
        params: ConsensusParams,
    ) -> Result<Self> {
        params.validate()?;
        let voter = Voter::new(
            params.min_quorum,
            params.team_size,
            params.max_not_voted_txs_to_keep,
            params.max_tx_votes_from_voter,
            validator,
        );
        Ok(Controller {
            inner: Mutex::new(Inner {
                voter,
                store,
                received_round_votes: HashMap::new(),
                received_tx_votes: HashMap::new(),
                received_vice_blocks: HashMap::new(),
                relay_tracker: relay::RelayTracker::new(),
                ready: false,
                ibd_complete_since: None,
                last_round: 0,
                round_advanced_at: Instant::now(),
            }),
            committee,
            relay,
            submitter,
            operator_key,
            params,
        })
    }

    /// Reconstructs voter state from the durable log at startup. Must be
    /// called before any ingress handler.
    pub fn load_from_store(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        let Inner {
            voter,
            store,
            received_round_votes,
            received_tx_votes,
            received_vice_blocks,
            ..
        } = &mut *guard;

        store.load_vice_blocks(&mut |_tip, block| {
            received_vice_blocks.insert(block.hash(), block.clone());
            voter.apply_vice_block(block);
        })?;
        store.load_round_votes(&mut |p2p| {
            if let Some(mn) = recover_round_vote_signer(self.committee.as_ref(), &p2p) {
                let rv = RoundVote {
                    tip: p2p.tip,
                    voter: mn,
                    round: p2p.round,
                    choice: p2p.choice,
                };
                voter.apply_round_vote(rv);
                received_round_votes.insert(p2p.hash(), p2p);
            }
        })?;
        store.load_tx_votes(&mut |p2p| {
            if let Some(mn) = recover_tx_vote_signer(self.committee.as_ref(), &p2p) {
                for choice in &p2p.choices {
                    let tv = TxVote {
                        tip: p2p.tip,
                        voter: mn,
                        round: p2p.round,
                        choice: *choice,
                    };
                    voter.apply_tx_vote(tv);
                }
                received_tx_votes.insert(p2p.hash(), p2p);
            }
        })?;
        Ok(())
    }

    /// Re-anchors voting at a new chain tip, enabling or disabling this
    /// node's voice depending on current committee membership.
    pub fn on_chain_tip_updated(&self, tip: BlockHash) {
        let mut guard = self.inner.lock();
        if !guard.ready {
            return;
        }
        if self.committee.team_size_at(tip) != Some(self.params.team_size) {
            return;
        }
        let my_id = self.committee.my_identity();
        match my_id {
            Some(id) if self.operator_key.is_some() => {
                log::info!("enabling dpos voter for {id}");
                guard.voter.set_voting(true, id);
            }
            _ => {
                guard.voter.set_voting(false, MasternodeId(dpos_core::Hash256::zero()));
            }
        }
        let out = guard.voter.update_tip(tip);
        guard.last_round = guard.voter.current_voting_round(tip);
        guard.round_advanced_at = Instant::now();
        let pending = self.handle_voter_output(&mut guard, &out);
        drop(guard);
        self.flush_relays(pending.unwrap_or_default());
    }

    pub fn proceed_vice_block(&self, block: ViceBlock) -> Result<()> {
        let hash = block.hash();
        let mut guard = self.inner.lock();
        if guard.received_vice_blocks.contains_key(&hash) {
            return Ok(());
        }
        let out = guard.voter.apply_vice_block(block.clone());
        guard.received_vice_blocks.insert(hash, block.clone());
        guard.store.write_batch(&WriteBatch {
            vice_blocks: vec![block.clone()],
            ..Default::default()
        })?;
        let accepted = out.errors.is_empty();
        let mut pending = self.handle_voter_output(&mut guard, &out)?;
        if accepted {
            let payload = bincode::serialize(&block).unwrap_or_default();
            if guard.relay_tracker.mark(hash.0, Instant::now()) {
                pending.push(PendingRelay {
                    kind: RelayKind::ViceBlock,
                    hash: hash.0,
                    payload,
                });
            }
        }
        drop(guard);
        self.flush_relays(pending);
        Ok(())
    }

    pub fn proceed_transaction(&self, tx: Transaction) -> Result<()> {
        let mut guard = self.inner.lock();
        let out = guard.voter.apply_tx(tx);
        let pending = self.handle_voter_output(&mut guard, &out)?;
        drop(guard);
        self.flush_relays(pending);
        Ok(())
    }

    pub fn proceed_round_vote(&self, vote: RoundVoteP2p) -> Result<()> {
        let hash = vote.hash();
        let mut guard = self.inner.lock();
        if guard.received_round_votes.contains_key(&hash) {
            return Ok(());
        }
        let Some(mn) = recover_round_vote_signer(self.committee.as_ref(), &vote) else {
            return Ok(());
        };
        let rv = RoundVote {
            tip: vote.tip,
            voter: mn,
            round: vote.round,
            choice: vote.choice,
        };
        let out = guard.voter.apply_round_vote(rv);
        let mut pending = Vec::new();
        if out.errors.is_empty() {
            // recorded before `handle_voter_output` so a `blockToSubmit` this
            // very vote triggers can harvest it when counting signatures.
            guard.received_round_votes.insert(hash, vote.clone());
            guard.store.write_batch(&WriteBatch {
                round_votes: vec![vote.clone()],
                ..Default::default()
            })?;
            if guard.relay_tracker.mark(hash.0, Instant::now()) {
                pending.push(PendingRelay {
                    kind: RelayKind::RoundVote,
                    hash: hash.0,
                    payload: bincode::serialize(&vote).unwrap_or_default(),
                });
            }
        }
        pending.extend(self.handle_voter_output(&mut guard, &out)?);
        drop(guard);
        self.flush_relays(pending);
        Ok(())
    }

    pub fn proceed_tx_vote(&self, vote: TxVoteP2p) -> Result<()> {
        let hash = vote.hash();
        let mut guard = self.inner.lock();
        if guard.received_tx_votes.contains_key(&hash) {
            return Ok(());
        }
        let Some(mn) = recover_tx_vote_signer(self.committee.as_ref(), &vote) else {
            return Ok(());
        };
        let mut pending = Vec::new();
        let mut accepted = true;
        for choice in &vote.choices {
            let tv = TxVote {
                tip: vote.tip,
                voter: mn,
                round: vote.round,
                choice: *choice,
            };
            let out = guard.voter.apply_tx_vote(tv);
            if !out.errors.is_empty() {
                accepted = false;
            }
            pending.extend(self.handle_voter_output(&mut guard, &out)?);
        }
        if accepted {
            guard.received_tx_votes.insert(hash, vote.clone());
            guard.store.write_batch(&WriteBatch {
                tx_votes: vec![vote.clone()],
                ..Default::default()
            })?;
            if guard.relay_tracker.mark(hash.0, Instant::now()) {
                pending.push(PendingRelay {
                    kind: RelayKind::TxVote,
                    hash: hash.0,
                    payload: bincode::serialize(&vote).unwrap_or_default(),
                });
            }
        }
        drop(guard);
        self.flush_relays(pending);
        Ok(())
    }

    /// Signs, persists, re-injects, and queues for relay every vote the
    /// voter itself emitted, and attempts to submit a finalized block.
    /// Returns `Err` if the output reported an invariant violation (the
    /// caller must not persist or relay the ingress that produced it).
    fn handle_voter_output(
        &self,
        guard: &mut Inner,
        out: &VoterOutput,
    ) -> Result<Vec<PendingRelay>> {
        if !out.errors.is_empty() {
            for e in &out.errors {
                log::warn!("voter rejected input: {e}");
            }
            return Ok(Vec::new());
        }
        let mut pending = Vec::new();
        if out.is_empty() {
            return Ok(pending);
        }
        if let Some(key) = &self.operator_key {
            for rv in &out.round_votes {
                let mut p2p = RoundVoteP2p {
                    tip: rv.tip,
                    round: rv.round,
                    choice: rv.choice,
                    signature: dpos_core::Signature::zero(),
                };
                match dpos_core::Signature::sign(p2p.signing_target(), key) {
                    Ok(sig) => {
                        p2p.signature = sig;
                        let hash = p2p.hash();
                        guard.received_round_votes.insert(hash, p2p.clone());
                        guard.store.write_batch(&WriteBatch {
                            round_votes: vec![p2p.clone()],
                            ..Default::default()
                        })?;
                        if guard.relay_tracker.mark(hash.0, Instant::now()) {
                            pending.push(PendingRelay {
                                kind: RelayKind::RoundVote,
                                hash: hash.0,
                                payload: bincode::serialize(&p2p).unwrap_or_default(),
                            });
                        }
                    }
                    Err(e) => log::error!("can't sign round vote: {e}"),
                }
            }
            for tv in &out.tx_votes {
                let mut p2p = TxVoteP2p {
                    tip: tv.tip,
                    round: tv.round,
                    choices: vec![tv.choice],
                    signature: dpos_core::Signature::zero(),
                };
                match dpos_core::Signature::sign(p2p.signing_target(), key) {
                    Ok(sig) => {
                        p2p.signature = sig;
                        let hash = p2p.hash();
                        guard.received_tx_votes.insert(hash, p2p.clone());
                        guard.store.write_batch(&WriteBatch {
                            tx_votes: vec![p2p.clone()],
                            ..Default::default()
                        })?;
                        if guard.relay_tracker.mark(hash.0, Instant::now()) {
                            pending.push(PendingRelay {
                                kind: RelayKind::TxVote,
                                hash: hash.0,
                                payload: bincode::serialize(&p2p).unwrap_or_default(),
                            });
                        }
                    }
                    Err(e) => log::error!("can't sign tx vote: {e}"),
                }
            }
        }
        if let Some(block) = &out.block_to_submit {
            self.try_submit(guard, block);
        }
        Ok(pending)
    }

    fn try_submit(&self, guard: &Inner, block: &ViceBlock) {
        let block_hash = block.hash();
        let round = guard.voter.current_voting_round(block.prev_block);
        let signatures: Vec<_> = guard
            .received_round_votes
            .values()
            .filter(|v| {
                v.tip == block.prev_block
                    && v.round == round
                    && v.choice.decision == Decision::Yes
                    && v.choice.subject == block_hash.0
            })
            .map(|v| v.signature.clone())
            .collect();
        if signatures.len() < self.params.min_quorum {
            log::warn!(
                "can't submit block {block_hash}: {} < {} signatures",
                signatures.len(),
                self.params.min_quorum
            );
            return;
        }
        let submission = BlockToSubmit {
            block: block.clone(),
            round,
            signatures,
        };
        if !self.submitter.submit(&submission) {
            log::warn!("chain processor rejected block {block_hash}");
        }
    }

    fn flush_relays(&self, pending: Vec<PendingRelay>) {
        for p in pending {
            self.relay.broadcast(p.kind, p.hash, &p.payload);
        }
    }

    /// Runs one iteration of the event loop's scheduled work: IBD/readiness
    /// detection, stalemate detection, and vote pruning. The caller sleeps
    /// between calls (500ms in production); `now` is threaded through for
    /// testability.
    pub fn run_tick(&self, now: Instant) {
        self.maybe_become_ready(now);
        self.maybe_escape_stalemate(now);
    }

    fn maybe_become_ready(&self, now: Instant) {
        let mut guard = self.inner.lock();
        if guard.ready {
            return;
        }
        if !self.committee.initial_block_download_complete() {
            guard.ibd_complete_since = None;
            return;
        }
        let since = *guard.ibd_complete_since.get_or_insert(now);
        if now.duration_since(since) < Duration::from_secs(self.params.delay_ibd_secs) {
            return;
        }
        guard.ready = true;
        log::info!("dpos controller ready, voting may now begin");
    }

    /// Checks whether the current round has stalled (Open Question (a): a
    /// stalemate is simply "at least one round vote exists at the current
    /// round but stalemateTimeout has elapsed without progress" — the
    /// commented-out check for uncommitted tx-votes in the original source
    /// is not part of the live behavior and is not reproduced here) and, if
    /// so, forces the round forward.
    fn maybe_escape_stalemate(&self, now: Instant) {
        let mut guard = self.inner.lock();
        let Some(tip) = guard.voter.current_tip() else {
            return;
        };
        let current_round = guard.voter.current_voting_round(tip);
        if current_round == 0 {
            return;
        }
        if current_round != guard.last_round {
            guard.last_round = current_round;
            guard.round_advanced_at = now;
            return;
        }
        if now.duration_since(guard.round_advanced_at)
            < Duration::from_secs(self.params.stalemate_timeout_secs)
        {
            return;
        }
        let has_round_vote = guard
            .voter
            .list_round_votes(tip)
            .iter()
            .any(|v| v.round == current_round);
        if !has_round_vote {
            return;
        }
        let out = guard.voter.on_round_too_long();
        let pending = self.handle_voter_output(&mut guard, &out).unwrap_or_default();
        guard.round_advanced_at = now;
        drop(guard);
        self.flush_relays(pending);
    }

    /// Drops every vote and vice-block whose tip has fallen more than the
    /// retention window behind the chain head, from memory and the store
    /// alike. Candidates are collected before anything is erased, fixing
    /// the source's iterate-while-erase bug in `removeOldVotes`, and tx
    /// votes are pruned from `received_tx_votes`, not the round-vote map.
    pub fn remove_old_votes(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        let chain_height = self.committee.chain_height();
        let is_stale = |tip: BlockHash| -> bool {
            match self.committee.height_of(tip) {
                Some(h) => chain_height.saturating_sub(h) > dpos_core::TIP_RETENTION_DEPTH,
                None => true,
            }
        };

        let stale_round_vote_hashes: Vec<_> = guard
            .received_round_votes
            .iter()
            .filter(|(_, v)| is_stale(v.tip))
            .map(|(h, _)| *h)
            .collect();
        let stale_tx_vote_hashes: Vec<_> = guard
            .received_tx_votes
            .iter()
            .filter(|(_, v)| is_stale(v.tip))
            .map(|(h, _)| *h)
            .collect();
        let stale_tips: std::collections::HashSet<BlockHash> = guard
            .received_vice_blocks
            .values()
            .map(|b| b.prev_block)
            .filter(|t| is_stale(*t))
            .collect();

        for h in stale_round_vote_hashes {
            guard.received_round_votes.remove(&h);
        }
        for h in stale_tx_vote_hashes {
            guard.received_tx_votes.remove(&h);
        }
        for tip in &stale_tips {
            guard.store.erase_by_tip(*tip)?;
            guard.voter.forget_tip(*tip);
            guard.received_vice_blocks.retain(|_, b| b.prev_block != *tip);
        }
        Ok(())
    }

    // -- consumer-facing queries --

    pub fn get_current_voting_round(&self) -> Round {
        let guard = self.inner.lock();
        guard
            .voter
            .current_tip()
            .map_or(0, |tip| guard.voter.current_voting_round(tip))
    }

    pub fn find_vice_block(&self, hash: BlockHash) -> Option<ViceBlock> {
        self.inner.lock().received_vice_blocks.get(&hash).cloned()
    }

    pub fn find_round_vote(&self, hash: VoteHash) -> Option<RoundVoteP2p> {
        self.inner.lock().received_round_votes.get(&hash).cloned()
    }

    pub fn find_tx_vote(&self, hash: VoteHash) -> Option<TxVoteP2p> {
        self.inner.lock().received_tx_votes.get(&hash).cloned()
    }

    pub fn list_vice_blocks(&self) -> Vec<ViceBlock> {
        self.inner.lock().received_vice_blocks.values().cloned().collect()
    }

    pub fn list_round_votes(&self) -> Vec<RoundVoteP2p> {
        self.inner.lock().received_round_votes.values().cloned().collect()
    }

    pub fn list_tx_votes(&self) -> Vec<TxVoteP2p> {
        self.inner.lock().received_tx_votes.values().cloned().collect()
    }

    pub fn list_committed_txs(&self) -> Vec<TxId> {
        let guard = self.inner.lock();
        guard
            .voter
            .current_tip()
            .map(|tip| guard.voter.list_committed_txs(tip))
            .unwrap_or_default()
    }

    pub fn is_committed_tx(&self, txid: TxId) -> bool {
        let guard = self.inner.lock();
        guard
            .voter
            .current_tip()
            .is_some_and(|tip| guard.voter.is_committed_tx(tip, txid))
    }

    pub fn is_tx_approved_by_me(&self, txid: TxId) -> bool {
        let guard = self.inner.lock();
        guard
            .voter
            .current_tip()
            .is_some_and(|tip| guard.voter.is_tx_approved_by_me(tip, txid))
    }

    pub fn calc_tx_voting_stats(&self, txid: TxId) -> dpos_voter::TxVotingStats {
        let guard = self.inner.lock();
        match guard.voter.current_tip() {
            Some(tip) => {
                let round = guard.voter.current_voting_round(tip);
                guard.voter.calc_tx_voting_stats(tip, round, txid)
            }
            None => Default::default(),
        }
    }
}

fn recover_round_vote_signer(
    committee: &dyn CommitteeView,
    vote: &RoundVoteP2p,
) -> Option<MasternodeId> {
    let pk = vote.signature.recover(vote.signing_target()).ok()?;
    let mn = MasternodeId::from_public_key(&pk);
    committee.is_team_member(vote.tip, &mn).then_some(mn)
}

fn recover_tx_vote_signer(
    committee: &dyn CommitteeView,
    vote: &TxVoteP2p,
) -> Option<MasternodeId> {
    let pk = vote.signature.recover(vote.signing_target()).ok()?;
    let mn = MasternodeId::from_public_key(&pk);
    committee.is_team_member(vote.tip, &mn).then_some(mn)
}
