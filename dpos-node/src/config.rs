//! On-disk node configuration, loaded once at startup (`spec.md` §6).

use dpos_core::{ConsensusParams, PrivateKey};
use serde::{Deserialize, Serialize};

/// Everything a host process needs to bring up a [`crate::Node`], beyond the
/// `CommitteeView`/`Validator`/`Relay`/`BlockSubmitter` implementations it
/// must supply itself (those come from the chain the finality layer rides
/// on, which is out of scope here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub chain_name: String,

    /// This node's signing key, present only if it operates a masternode.
    pub operator_private_key: Option<PrivateKey>,

    /// Directory for the durable vote/block log (`SledStore::open`).
    pub store_path: String,

    pub consensus: ConsensusParams,
}

impl NodeConfig {
    /// Parses a TOML config file.
    pub fn load(path: impl AsRef<std::path::Path>) -> eyre::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&text)?;
        config.consensus.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> eyre::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NodeConfig {
        NodeConfig {
            chain_name: "testnet".to_owned(),
            operator_private_key: None,
            store_path: "/tmp/dpos".to_owned(),
            consensus: ConsensusParams {
                team_size: 4,
                min_quorum: 3,
                max_not_voted_txs_to_keep: 100,
                max_tx_votes_from_voter: 100,
                polling_period_secs: 10,
                stalemate_timeout_secs: 30,
                delay_ibd_secs: 60,
            },
        }
    }

    #[test]
    fn round_trips_through_toml() {
        let config = sample();
        let text = config.to_toml_string().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, text).unwrap();
        let loaded = NodeConfig::load(&path).unwrap();
        assert_eq!(loaded.chain_name, config.chain_name);
        assert_eq!(loaded.consensus, config.consensus);
    }

    #[test]
    fn rejects_invalid_consensus_params() {
        let mut config = sample();
        config.consensus.min_quorum = 1;
        let text = toml::to_string_pretty(&config).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, text).unwrap();
        assert!(NodeConfig::load(&path).is_err());
    }
}
