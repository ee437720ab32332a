//! Pure, deterministic BFT voting state machine. Ingests tip changes,
//! vice-blocks, transactions, round votes, and tx votes; emits the votes
//! this node should cast and, once a round reaches quorum, the block to
//! submit. All I/O and chain-state access happen through the `Validator`
//! capability injected at construction; the voter itself never blocks
//! and never touches the network, the clock, or storage.
//!
//! The caller (the controller) is responsible for signature recovery and
//! committee-membership checks before handing a vote to this crate — by
//! the time a `RoundVote` or `TxVote` reaches a `Voter`, its signer is
//! already known to be a committee member at its tip.

mod misbehavior;
mod progress;
mod state;

pub use dpos_core::{
    BlockHash, Decision, MasternodeId, Round, RoundVote, Transaction, TxId, TxVote, Validator,
    ValidationOutcome, ViceBlock, VoteChoice,
};

use state::TipState;
use std::collections::HashMap;

/// Everything a single `Voter` operation may produce. `errors` is non-empty
/// only when the input violated an invariant, in which case the caller must
/// treat the whole output as rejected: no side effect accompanies an error.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VoterOutput {
    pub round_votes: Vec<RoundVote>,
    pub tx_votes: Vec<TxVote>,
    pub block_to_submit: Option<ViceBlock>,
    pub errors: Vec<String>,
}

impl VoterOutput {
    fn empty() -> Self {
        Default::default()
    }

    pub fn is_empty(&self) -> bool {
        self.round_votes.is_empty()
            && self.tx_votes.is_empty()
            && self.block_to_submit.is_none()
            && self.errors.is_empty()
    }

    fn error(message: impl Into<String>) -> Self {
        VoterOutput {
            errors: vec![message.into()],
            ..Default::default()
        }
    }

    fn merge(&mut self, other: VoterOutput) {
        self.round_votes.extend(other.round_votes);
        self.tx_votes.extend(other.tx_votes);
        if other.block_to_submit.is_some() {
            self.block_to_submit = other.block_to_submit;
        }
        self.errors.extend(other.errors);
    }
}

/// Per-(yes,no,pass) vote counts for a single transaction in a single round.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TxVotingStats {
    pub yes: usize,
    pub no: usize,
    pub pass: usize,
}

/// The finality voting state machine for one dPoS committee.
///
/// `tips` retains a `TipState` per tip this node has ever voted under,
/// bounded only by however often the controller calls `forget_tip` —
/// this crate has no notion of chain height and cannot decide retention
/// on its own (`spec.md` §4.3's 100-block window is enforced by the
/// controller, which does know chain height).
pub struct Voter {
    am_i_voter: bool,
    me: Option<MasternodeId>,
    current_tip: Option<BlockHash>,
    tips: HashMap<BlockHash, TipState>,
    min_quorum: usize,
    num_of_voters: usize,
    /// per-tip cap on transactions tracked but not yet personally tx-voted
    /// on, §3's per-voter fairness bound.
    max_not_voted_txs_to_keep: usize,
    /// per-round cap on distinct transactions a single voter may cast a
    /// tx-vote for, §3's per-voter fairness bound.
    max_tx_votes_from_voter: usize,
    validator: Box<dyn Validator>,
}

impl Voter {
    pub fn new(
        min_quorum: usize,
        num_of_voters: usize,
        max_not_voted_txs_to_keep: usize,
        max_tx_votes_from_voter: usize,
        validator: Box<dyn Validator>,
    ) -> Self {
        Voter {
            am_i_voter: false,
            me: None,
            current_tip: None,
            tips: HashMap::new(),
            min_quorum,
            num_of_voters,
            max_not_voted_txs_to_keep,
            max_tx_votes_from_voter,
            validator,
        }
    }

    /// Enables or disables vote emission. A disabled voter still ingests
    /// and tallies votes (so it keeps an accurate view of commitment) but
    /// never casts its own.
    pub fn set_voting(&mut self, on: bool, me: MasternodeId) -> VoterOutput {
        self.am_i_voter = on;
        self.me = Some(me);
        VoterOutput::empty()
    }

    /// Re-anchors future voting at `new_tip`. Historical `TipState`s are
    /// never purged here (`spec.md` §4.2 "Transitions on tip change"); a
    /// reorg back to a previously-seen tip resumes exactly where it left
    /// off rather than restarting from round 1.
    pub fn update_tip(&mut self, new_tip: BlockHash) -> VoterOutput {
        let first_time = !self.tips.contains_key(&new_tip);
        self.current_tip = Some(new_tip);
        let state = self.tips.entry(new_tip).or_default();
        if state.current_round == 0 {
            state.current_round = 1;
        }
        if self.am_i_voter && first_time {
            self.maybe_cast_initial_round_vote(new_tip)
        } else {
            VoterOutput::empty()
        }
    }

    pub fn apply_vice_block(&mut self, block: ViceBlock) -> VoterOutput {
        let tip = block.prev_block;
        let state = self.tips.entry(tip).or_default();
        if state.current_round == 0 {
            state.current_round = 1;
        }
        let hash = block.hash();
        state.vice_blocks.insert(hash, block);
        if self.am_i_voter && Some(tip) == self.current_tip {
            self.maybe_cast_initial_round_vote(tip)
        } else {
            VoterOutput::empty()
        }
    }

    pub fn apply_tx(&mut self, tx: Transaction) -> VoterOutput {
        let Some(tip) = self.current_tip else {
            return VoterOutput::empty();
        };
        let txid = tx.id();
        {
            let state = self.tips.entry(tip).or_default();
            if !state.known_txs.contains(&txid) {
                if state.not_yet_voted_count >= self.max_not_voted_txs_to_keep {
                    return VoterOutput::empty();
                }
                state.mark_tx_known(txid);
            }
        }
        if !self.am_i_voter {
            return VoterOutput::empty();
        }
        let Some(me) = self.me else {
            return VoterOutput::empty();
        };
        let state = self.tips.get_mut(&tip).unwrap();
        if state.finalized {
            return VoterOutput::empty();
        }
        let round = state.current_round;
        if state.tx_voted_this_round.get(&txid) == Some(&round) {
            return VoterOutput::empty();
        }
        if state.tx_votes_from_in_round(round, me) >= self.max_tx_votes_from_voter {
            return VoterOutput::empty();
        }
        let outcome = self.validator.validate_tx(&tx);
        if !outcome.ok {
            return VoterOutput::empty();
        }
        let choice = VoteChoice::yes(txid.0);
        let tv = TxVote {
            tip,
            voter: me,
            round,
            choice,
        };
        let state = self.tips.get_mut(&tip).unwrap();
        state.mark_tx_voted(txid, round);
        state
            .tx_votes
            .entry(round)
            .or_default()
            .entry(txid)
            .or_default()
            .insert(me, tv.clone());
        if state.yes_tx_count(round, &txid) >= self.min_quorum {
            state.committed_txs.insert(txid);
        }
        let mut output = VoterOutput {
            tx_votes: vec![tv],
            ..Default::default()
        };
        // a candidate waiting only on this transaction may now be votable.
        output.merge(self.maybe_cast_initial_round_vote(tip));
        output
    }

    pub fn apply_round_vote(&mut self, rv: RoundVote) -> VoterOutput {
        let tip = rv.tip;
        let round = rv.round;
        let state = self.tips.entry(tip).or_default();
        if state.finalized {
            return VoterOutput::empty();
        }
        let existing = state
            .round_votes
            .get(&round)
            .and_then(|m| m.get(&rv.voter))
            .cloned();
        match misbehavior::admit_round_vote(existing.as_ref(), &rv) {
            misbehavior::Admit::Equivocation => {
                return VoterOutput::error(format!(
                    "equivocating round vote from {} in round {round} for tip {tip}",
                    rv.voter
                ));
            }
            misbehavior::Admit::Duplicate => return VoterOutput::empty(),
            misbehavior::Admit::New => {}
        }
        state
            .round_votes
            .entry(round)
            .or_default()
            .insert(rv.voter, rv.clone());

        if round != state.current_round {
            return VoterOutput::empty();
        }
        self.settle_round(tip)
    }

    pub fn apply_tx_vote(&mut self, tv: TxVote) -> VoterOutput {
        let tip = tv.tip;
        let round = tv.round;
        let txid = TxId(tv.choice.subject);
        let state = self.tips.entry(tip).or_default();
        if state.finalized {
            return VoterOutput::empty();
        }
        let existing = state
            .tx_votes
            .get(&round)
            .and_then(|by_tx| by_tx.get(&txid))
            .and_then(|by_voter| by_voter.get(&tv.voter))
            .cloned();
        match misbehavior::admit_tx_vote(existing.as_ref(), &tv) {
            misbehavior::Admit::Equivocation => {
                return VoterOutput::error(format!(
                    "equivocating tx vote from {} in round {round} for tx {txid}",
                    tv.voter
                ));
            }
            misbehavior::Admit::Duplicate => return VoterOutput::empty(),
            misbehavior::Admit::New => {}
        }
        if state.tx_votes_from_in_round(round, tv.voter) >= self.max_tx_votes_from_voter {
            return VoterOutput::error(format!(
                "{} exceeded the per-round tx-vote limit in round {round}",
                tv.voter
            ));
        }
        state
            .tx_votes
            .entry(round)
            .or_default()
            .entry(txid)
            .or_default()
            .insert(tv.voter, tv.clone());
        if tv.choice.decision == Decision::Yes && state.yes_tx_count(round, &txid) >= self.min_quorum {
            state.committed_txs.insert(txid);
        }
        VoterOutput::empty()
    }

    /// Stalemate escape hatch: casts a PASS round vote for the current
    /// round (if this voter hasn't already voted in it) and unconditionally
    /// advances to the next round with a fresh YES/NO/PASS vote, regardless
    /// of whether the rest of the committee has voted.
    pub fn on_round_too_long(&mut self) -> VoterOutput {
        let (Some(tip), Some(me)) = (self.current_tip, self.me) else {
            return VoterOutput::empty();
        };
        if !self.am_i_voter {
            return VoterOutput::empty();
        }
        let state = self.tips.entry(tip).or_default();
        if state.finalized {
            return VoterOutput::empty();
        }
        let mut output = VoterOutput::empty();
        let round = state.current_round;
        if !state
            .round_votes
            .get(&round)
            .map(|m| m.contains_key(&me))
            .unwrap_or(false)
        {
            let rv = RoundVote {
                tip,
                voter: me,
                round,
                choice: VoteChoice::pass(),
            };
            state.round_votes.entry(round).or_default().insert(me, rv.clone());
            output.round_votes.push(rv);
        }

        let state = self.tips.get_mut(&tip).unwrap();
        state.current_round += 1;
        let new_round = state.current_round;
        let choice = progress::decide_round_choice(&self.tips[&tip], self.validator.as_ref());
        let rv = RoundVote {
            tip,
            voter: me,
            round: new_round,
            choice,
        };
        let state = self.tips.get_mut(&tip).unwrap();
        state
            .round_votes
            .entry(new_round)
            .or_default()
            .insert(me, rv.clone());
        output.round_votes.push(rv);
        output
    }

    /// Drops all retained state for `tip`. Called by the controller once
    /// the tip has fallen outside the retention window.
    pub fn forget_tip(&mut self, tip: BlockHash) {
        self.tips.remove(&tip);
    }

    /// Casts this voter's round vote for `tip`'s current round if it
    /// hasn't already, and the voter now has an actual opinion (YES or NO)
    /// rather than an empty PASS — there is nothing useful to broadcast
    /// before a candidate or a conflicting commitment exists.
    fn maybe_cast_initial_round_vote(&mut self, tip: BlockHash) -> VoterOutput {
        let Some(me) = self.me else {
            return VoterOutput::empty();
        };
        let state = self.tips.get_mut(&tip).unwrap();
        if state.finalized {
            return VoterOutput::empty();
        }
        let round = state.current_round;
        if state
            .round_votes
            .get(&round)
            .map(|m| m.contains_key(&me))
            .unwrap_or(false)
        {
            return VoterOutput::empty();
        }
        let choice = progress::decide_round_choice(&self.tips[&tip], self.validator.as_ref());
        if choice.decision == Decision::Pass {
            return VoterOutput::empty();
        }
        let rv = RoundVote {
            tip,
            voter: me,
            round,
            choice,
        };
        let state = self.tips.get_mut(&tip).unwrap();
        state.round_votes.entry(round).or_default().insert(me, rv.clone());
        let mut output = VoterOutput {
            round_votes: vec![rv],
            ..Default::default()
        };
        output.merge(self.settle_round(tip));
        output
    }

    /// Checks whether `tip`'s current round just reached quorum on some
    /// candidate (emitting `blockToSubmit` and freezing the tip) or was
    /// exhausted by unanimous non-YES votes (advancing the round and, if
    /// this node votes, casting its next choice).
    fn settle_round(&mut self, tip: BlockHash) -> VoterOutput {
        let mut output = VoterOutput::empty();
        let round = self.tips[&tip].current_round;

        let finalized_block = {
            let state = &self.tips[&tip];
            state
                .vice_blocks
                .keys()
                .find(|hash| state.yes_count_for(round, **hash) >= self.min_quorum)
                .copied()
        };
        if let Some(hash) = finalized_block {
            let state = self.tips.get_mut(&tip).unwrap();
            state.finalized = true;
            output.block_to_submit = state.vice_blocks.get(&hash).cloned();
            return output;
        }

        let votes: Vec<_> = self.tips[&tip].round_votes_in(round).collect();
        let exhausted = votes.len() == self.num_of_voters
            && votes.iter().all(|v| v.choice.decision != Decision::Yes);
        if !exhausted {
            return output;
        }

        let state = self.tips.get_mut(&tip).unwrap();
        state.current_round += 1;
        let new_round = state.current_round;
        if self.am_i_voter {
            if let Some(me) = self.me {
                let choice = progress::decide_round_choice(&self.tips[&tip], self.validator.as_ref());
                let rv = RoundVote {
                    tip,
                    voter: me,
                    round: new_round,
                    choice,
                };
                let state = self.tips.get_mut(&tip).unwrap();
                state
                    .round_votes
                    .entry(new_round)
                    .or_default()
                    .insert(me, rv.clone());
                output.round_votes.push(rv);
            }
        }
        output
    }

    /// The tip voting is currently anchored at, if `update_tip` has ever been called.
    pub fn current_tip(&self) -> Option<BlockHash> {
        self.current_tip
    }

    pub fn current_voting_round(&self, tip: BlockHash) -> Round {
        self.tips.get(&tip).map_or(0, |s| s.current_round)
    }

    pub fn find_vice_block(&self, tip: BlockHash, hash: BlockHash) -> Option<&ViceBlock> {
        self.tips.get(&tip)?.vice_blocks.get(&hash)
    }

    pub fn list_vice_blocks(&self, tip: BlockHash) -> Vec<&ViceBlock> {
        self.tips
            .get(&tip)
            .map(|s| s.vice_blocks.values().collect())
            .unwrap_or_default()
    }

    pub fn list_round_votes(&self, tip: BlockHash) -> Vec<&RoundVote> {
        self.tips
            .get(&tip)
            .map(|s| s.round_votes.values().flat_map(|m| m.values()).collect())
            .unwrap_or_default()
    }

    pub fn list_tx_votes(&self, tip: BlockHash) -> Vec<&TxVote> {
        self.tips
            .get(&tip)
            .map(|s| {
                s.tx_votes
                    .values()
                    .flat_map(|by_tx| by_tx.values())
                    .flat_map(|by_voter| by_voter.values())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn list_committed_txs(&self, tip: BlockHash) -> Vec<TxId> {
        self.tips
            .get(&tip)
            .map(|s| s.committed_txs.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_committed_tx(&self, tip: BlockHash, txid: TxId) -> bool {
        self.tips
            .get(&tip)
            .is_some_and(|s| s.committed_txs.contains(&txid))
    }

    pub fn is_tx_approved_by_me(&self, tip: BlockHash, txid: TxId) -> bool {
        let Some(me) = self.me else {
            return false;
        };
        let Some(state) = self.tips.get(&tip) else {
            return false;
        };
        state.tx_votes.values().any(|by_tx| {
            by_tx
                .get(&txid)
                .and_then(|by_voter| by_voter.get(&me))
                .is_some_and(|v| v.choice.decision == Decision::Yes)
        })
    }

    pub fn calc_tx_voting_stats(&self, tip: BlockHash, round: Round, txid: TxId) -> TxVotingStats {
        let Some(state) = self.tips.get(&tip) else {
            return TxVotingStats::default();
        };
        let mut stats = TxVotingStats::default();
        for v in state.tx_votes_in(round, &txid) {
            match v.choice.decision {
                Decision::Yes => stats.yes += 1,
                Decision::No => stats.no += 1,
                Decision::Pass => stats.pass += 1,
            }
        }
        stats
    }
}
