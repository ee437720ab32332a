//! Consensus parameters, fixed by the network and read once at startup
//! (`spec.md` §6), mirroring `vetomint::ConsensusParams` /
//! `simperby-core::HeightInfo::consensus_params` in shape.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConsensusParams {
    /// Required committee size; dPoS is enabled only when the on-chain
    /// committee at the tip has exactly this size.
    pub team_size: usize,
    /// YES-votes required to finalize a block.
    pub min_quorum: usize,
    /// Per-voter fairness bound: not-yet-voted transactions to keep around.
    pub max_not_voted_txs_to_keep: usize,
    /// Per-voter fairness bound: tx-votes to accept from a single voter.
    pub max_tx_votes_from_voter: usize,
    /// Seconds between prune/maintenance ticks.
    pub polling_period_secs: u64,
    /// Seconds without round progress before a stalemate is declared.
    pub stalemate_timeout_secs: u64,
    /// Seconds to wait after initial block download completes before
    /// enabling voting.
    pub delay_ibd_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("min_quorum ({min_quorum}) must be greater than 2/3 of team_size ({team_size})")]
    QuorumTooLow {
        min_quorum: usize,
        team_size: usize,
    },
}

impl ConsensusParams {
    /// Validates the Byzantine-fault-tolerance invariant `min_quorum > 2 * team_size / 3`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_quorum * 3 > 2 * self.team_size {
            Ok(())
        } else {
            Err(ConfigError::QuorumTooLow {
                min_quorum: self.min_quorum,
                team_size: self.team_size,
            })
        }
    }
}

/// The depth (in blocks behind the chain head) beyond which a tip's
/// per-tip state and persisted votes are pruned.
pub const TIP_RETENTION_DEPTH: u64 = 100;
