use super::*;

/// Picks the round vote a local voter should cast for `tip` on `state`'s
/// current round: YES for a candidate whose transactions all validate and
/// that carries every already-committed transaction; NO if some committed
/// transaction is excluded from every candidate; PASS otherwise.
pub(crate) fn decide_round_choice(state: &TipState, validator: &dyn Validator) -> VoteChoice {
    for block in state.vice_blocks.values() {
        let carries_all_committed = state
            .committed_txs
            .iter()
            .all(|txid| block.transactions.contains(txid));
        if !carries_all_committed {
            continue;
        }
        let all_txs_known = block.transactions.iter().all(|t| state.known_txs.contains(t));
        if !all_txs_known {
            continue;
        }
        let outcome = validator.validate_block(block, &state.known_txs, true);
        if outcome.ok {
            return VoteChoice::yes(block.hash().0);
        }
    }
    if state.committed_txs.is_empty() {
        VoteChoice::pass()
    } else {
        VoteChoice::no()
    }
}
