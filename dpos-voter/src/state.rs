use super::*;
use std::collections::{HashMap, HashSet};

/// All state the voter keeps for a single tip. Retained for a bounded
/// window after the tip stops being current, so late peers reconciling
/// against a recently-abandoned tip still see a consistent view.
#[derive(Debug, Clone, Default)]
pub(crate) struct TipState {
    pub(crate) vice_blocks: HashMap<BlockHash, ViceBlock>,
    /// at most one round vote per (voter, round) — invariant 1.
    pub(crate) round_votes: HashMap<Round, HashMap<MasternodeId, RoundVote>>,
    /// at most one tx vote per (voter, round, txid) — invariant 2.
    pub(crate) tx_votes: HashMap<Round, HashMap<TxId, HashMap<MasternodeId, TxVote>>>,
    pub(crate) known_txs: HashSet<TxId>,
    pub(crate) committed_txs: HashSet<TxId>,
    /// round the local voter last cast a tx-vote for a given txid in, so a
    /// re-announced transaction is not re-voted every round.
    pub(crate) tx_voted_this_round: HashMap<TxId, Round>,
    /// `known_txs.len() - tx_voted_this_round.len()`, kept incrementally so
    /// the `max_not_voted_txs_to_keep` check doesn't rescan `known_txs` on
    /// every incoming transaction.
    pub(crate) not_yet_voted_count: usize,
    pub(crate) current_round: Round,
    /// set once `blockToSubmit` has been emitted for this tip; further
    /// round activity on it is a no-op.
    pub(crate) finalized: bool,
}

impl TipState {
    pub(crate) fn round_votes_in(&self, round: Round) -> impl Iterator<Item = &RoundVote> {
        self.round_votes
            .get(&round)
            .into_iter()
            .flatten()
            .map(|(_, v)| v)
    }

    pub(crate) fn tx_votes_in(&self, round: Round, txid: &TxId) -> impl Iterator<Item = &TxVote> {
        self.tx_votes
            .get(&round)
            .and_then(|by_tx| by_tx.get(txid))
            .into_iter()
            .flatten()
            .map(|(_, v)| v)
    }

    pub(crate) fn yes_count_for(&self, round: Round, subject: BlockHash) -> usize {
        self.round_votes_in(round)
            .filter(|v| v.choice.decision == Decision::Yes && v.choice.subject == subject.0)
            .count()
    }

    pub(crate) fn yes_tx_count(&self, round: Round, txid: &TxId) -> usize {
        self.tx_votes_in(round, txid)
            .filter(|v| v.choice.decision == Decision::Yes)
            .count()
    }

    /// how many distinct transactions `voter` has already cast a tx-vote for
    /// in `round`, for the per-voter fairness bound.
    pub(crate) fn tx_votes_from_in_round(&self, round: Round, voter: MasternodeId) -> usize {
        self.tx_votes
            .get(&round)
            .into_iter()
            .flatten()
            .filter(|(_, by_voter)| by_voter.contains_key(&voter))
            .count()
    }

    /// records `txid` as known and not yet personally voted on; caller must
    /// already have checked it against `max_not_voted_txs_to_keep`.
    pub(crate) fn mark_tx_known(&mut self, txid: TxId) {
        if self.known_txs.insert(txid) {
            self.not_yet_voted_count += 1;
        }
    }

    /// records that the local voter just cast a tx-vote for `txid` in
    /// `round`.
    pub(crate) fn mark_tx_voted(&mut self, txid: TxId, round: Round) {
        if self.tx_voted_this_round.insert(txid, round).is_none() {
            self.not_yet_voted_count -= 1;
        }
    }
}
