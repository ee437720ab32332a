//! The external chain's block-processing entry point, the hand-off target
//! for a finalized `BlockToSubmit` (source: `ProcessNewBlock`).

use dpos_core::BlockToSubmit;

pub trait BlockSubmitter: Send + Sync {
    /// Submits a quorum-signed block to the chain processor. Returns
    /// whether it was accepted; on rejection the controller logs and the
    /// voter keeps its commitments for a later retry.
    fn submit(&self, block: &BlockToSubmit) -> bool;
}

/// Accepts everything; for standalone or test deployments.
pub struct AcceptingSubmitter;

impl BlockSubmitter for AcceptingSubmitter {
    fn submit(&self, _block: &BlockToSubmit) -> bool {
        true
    }
}
