//! Engine factory: chain-config driven consensus engine construction.

use crate::{
    chainspec::{ChainConfig, ChainConfigError, TransitionError},
    consensus::{
        beacon::Beacon,
        clique::{Clique, SnapshotDatabase},
        error::EngineError,
        ethash::Ethash,
        hybrid::Hybrid,
        traits::Engine,
    },
};
use std::sync::Arc;
use tracing::info;

/// Construct the consensus engine dictated by `config`.
///
/// Decision ladder:
/// 1. configs without a terminal total difficulty are rejected (PoS-era
///    nodes are a precondition);
/// 2. a transition height yields a hybrid over a beacon-wrapped clique and
///    an independent standalone clique;
/// 3. a clique sub-config alone yields a beacon-wrapped clique;
/// 4. anything else yields a beacon-wrapped ethash.
pub fn create_consensus_engine<DB>(
    config: &ChainConfig,
    db: Arc<DB>,
) -> Result<Arc<dyn Engine>, EngineError>
where
    DB: SnapshotDatabase + 'static,
{
    // Malformed transitions must never construct an engine
    config.check_fork_order()?;

    if config.terminal_total_difficulty.is_none() {
        return Err(EngineError::PostMergeRequired);
    }

    if let Some(transition_block) = config.transition_block() {
        let clique_config = config
            .clique
            .ok_or(ChainConfigError::InvalidTransitionBlock(
                TransitionError::MissingCliqueConfig,
            ))?;

        // Two intentionally independent clique instances: one embedded as
        // the PoS engine's pre-merge fallback, one standalone for the PoA
        // era. They share the snapshot database, so their persisted views
        // cannot diverge.
        let pre_merge = Arc::new(Clique::new(clique_config, db.clone()));
        let pos: Arc<dyn Engine> = Arc::new(Beacon::new(pre_merge));
        let poa: Arc<dyn Engine> = Arc::new(Clique::new(clique_config, db));

        info!(
            target: "consensus::factory",
            transition_block,
            period = clique_config.period,
            epoch = clique_config.epoch,
            "constructing hybrid PoS to PoA engine"
        );
        let hybrid = Hybrid::new(Some(pos), Some(poa), transition_block)?;
        return Ok(Arc::new(hybrid));
    }

    if let Some(clique_config) = config.clique {
        info!(
            target: "consensus::factory",
            period = clique_config.period,
            epoch = clique_config.epoch,
            "constructing beacon-wrapped clique engine"
        );
        return Ok(Arc::new(Beacon::new(Arc::new(Clique::new(
            clique_config,
            db,
        )))));
    }

    info!(target: "consensus::factory", "constructing beacon-wrapped ethash engine");
    Ok(Arc::new(Beacon::new(Arc::new(Ethash::new()))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::clique::{CliqueConfig, MemorySnapshotDatabase};
    use alloy_primitives::U256;

    fn base_config() -> ChainConfig {
        ChainConfig {
            chain_id: 1337,
            terminal_total_difficulty: Some(U256::ZERO),
            ..Default::default()
        }
    }

    fn clique_config() -> CliqueConfig {
        CliqueConfig {
            period: 15,
            epoch: 30000,
        }
    }

    #[test]
    fn test_transition_config_yields_hybrid() {
        let config = ChainConfig {
            pos_to_poa_transition_block: Some(1000),
            clique: Some(clique_config()),
            ..base_config()
        };
        let engine = create_consensus_engine(&config, MemorySnapshotDatabase::new_arc()).unwrap();
        assert_eq!(engine.kind(), "Hybrid");
    }

    #[test]
    fn test_transition_at_genesis_yields_hybrid() {
        let config = ChainConfig {
            pos_to_poa_transition_block: Some(0),
            clique: Some(clique_config()),
            ..base_config()
        };
        let engine = create_consensus_engine(&config, MemorySnapshotDatabase::new_arc()).unwrap();
        assert_eq!(engine.kind(), "Hybrid");
    }

    #[test]
    fn test_large_transition_block_yields_hybrid() {
        let config = ChainConfig {
            pos_to_poa_transition_block: Some(999_999_999),
            clique: Some(clique_config()),
            ..base_config()
        };
        let engine = create_consensus_engine(&config, MemorySnapshotDatabase::new_arc()).unwrap();
        assert_eq!(engine.kind(), "Hybrid");
    }

    #[test]
    fn test_clique_without_transition_yields_beacon() {
        let config = ChainConfig {
            clique: Some(clique_config()),
            ..base_config()
        };
        let engine = create_consensus_engine(&config, MemorySnapshotDatabase::new_arc()).unwrap();
        assert_eq!(engine.kind(), "Beacon");
    }

    #[test]
    fn test_plain_config_yields_beacon_wrapped_ethash() {
        let config = base_config();
        let engine = create_consensus_engine(&config, MemorySnapshotDatabase::new_arc()).unwrap();
        assert_eq!(engine.kind(), "Beacon");
    }

    #[test]
    fn test_missing_terminal_total_difficulty_is_rejected() {
        let config = ChainConfig {
            chain_id: 1337,
            ..Default::default()
        };
        let err = match create_consensus_engine(&config, MemorySnapshotDatabase::new_arc()) {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert_eq!(err, EngineError::PostMergeRequired);
    }

    #[test]
    fn test_transition_without_clique_is_rejected() {
        let config = ChainConfig {
            pos_to_poa_transition_block: Some(1000),
            ..base_config()
        };
        let err = match create_consensus_engine(&config, MemorySnapshotDatabase::new_arc()) {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(err
            .to_string()
            .contains("PoS to PoA transition requires Clique configuration"));
    }

    #[test]
    fn test_negative_transition_is_rejected() {
        let config = ChainConfig {
            pos_to_poa_transition_block: Some(-1),
            clique: Some(clique_config()),
            ..base_config()
        };
        let err = match create_consensus_engine(&config, MemorySnapshotDatabase::new_arc()) {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(err
            .to_string()
            .contains("PoS to PoA transition block cannot be negative"));
    }

    #[test]
    fn test_genesis_json_to_engine() {
        // The S6 shape: parse genesis JSON, validate, construct
        let config = ChainConfig::from_json(
            r#"{
                "chainId": 1337,
                "terminalTotalDifficulty": 0,
                "posToPoaTransitionBlock": 1000,
                "clique": { "period": 15, "epoch": 30000 }
            }"#,
        )
        .unwrap();
        let engine = create_consensus_engine(&config, MemorySnapshotDatabase::new_arc()).unwrap();
        assert_eq!(engine.kind(), "Hybrid");

        // Stripping the clique sub-config flips construction into rejection
        let stripped = ChainConfig {
            clique: None,
            ..config
        };
        let err = match create_consensus_engine(&stripped, MemorySnapshotDatabase::new_arc()) {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(err
            .to_string()
            .contains("PoS to PoA transition requires Clique configuration"));
    }
}
