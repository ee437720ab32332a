use super::*;

/// Outcome of checking an incoming vote against whatever this (voter, round[,
/// txid]) slot already holds.
pub(crate) enum Admit {
    /// No prior vote in this slot; accept and record it.
    New,
    /// Harmless retransmission of the same choice; accept, nothing changes.
    Duplicate,
    /// Same slot, different choice: Byzantine equivocation. Reject.
    Equivocation,
}

pub(crate) fn admit_round_vote(existing: Option<&RoundVote>, incoming: &RoundVote) -> Admit {
    match existing {
        None => Admit::New,
        Some(e) if e.choice == incoming.choice => Admit::Duplicate,
        Some(_) => Admit::Equivocation,
    }
}

pub(crate) fn admit_tx_vote(existing: Option<&TxVote>, incoming: &TxVote) -> Admit {
    match existing {
        None => Admit::New,
        Some(e) if e.choice == incoming.choice => Admit::Duplicate,
        Some(_) => Admit::Equivocation,
    }
}
