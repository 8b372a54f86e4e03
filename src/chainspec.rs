//! Chain configuration and the PoS to PoA transition extension.
//!
//! The genesis chain config gains one optional key,
//! `posToPoaTransitionBlock`. When present, the sibling `clique` sub-config
//! is required and the node switches from PoS to clique PoA dispatch at that
//! height. An absent key preserves prior behaviour byte-for-byte.

use crate::consensus::clique::CliqueConfig;
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Chain configuration, reduced to the fields consensus selection reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainConfig {
    /// Chain identifier.
    pub chain_id: u64,

    /// Total difficulty at which the chain moved to PoS. Presence of this
    /// marker is a precondition for engine construction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_total_difficulty: Option<U256>,

    /// Height at which consensus switches from PoS to clique PoA.
    ///
    /// Signed so that a genesis file edited to a negative value survives
    /// parsing and is rejected by [`ChainConfig::check_fork_order`] with a
    /// precise diagnostic instead of an opaque decode error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos_to_poa_transition_block: Option<i64>,

    /// Clique PoA sub-configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clique: Option<CliqueConfig>,
}

impl ChainConfig {
    /// Parse a chain config from genesis JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The validated transition height, when one is configured.
    ///
    /// Negative values (rejected by [`Self::check_fork_order`]) read as
    /// absent so nothing downstream can dispatch on them.
    pub fn transition_block(&self) -> Option<u64> {
        self.pos_to_poa_transition_block
            .and_then(|block| u64::try_from(block).ok())
    }

    /// Whether `block_number` falls in the PoA era.
    ///
    /// This predicate is the sole authority on which era a block belongs to.
    pub fn is_pos_to_poa_transition(&self, block_number: u64) -> bool {
        self.transition_block()
            .is_some_and(|height| block_number >= height)
    }

    /// Validate the fork schedule. Part of node start; a failure here aborts
    /// the node before any engine is constructed.
    pub fn check_fork_order(&self) -> Result<(), ChainConfigError> {
        self.validate_pos_to_poa_transition()
            .map_err(ChainConfigError::InvalidTransitionBlock)
    }

    fn validate_pos_to_poa_transition(&self) -> Result<(), TransitionError> {
        let Some(block) = self.pos_to_poa_transition_block else {
            return Ok(());
        };
        if block < 0 {
            return Err(TransitionError::NegativeTransitionBlock);
        }
        if self.clique.is_none() {
            return Err(TransitionError::MissingCliqueConfig);
        }
        Ok(())
    }

    /// Check whether `newcfg` can replace this (stored) config for a chain
    /// whose head is at `head_block`.
    ///
    /// Changing the transition height under a head that already passed the
    /// smaller of the two heights requires rewinding to one block before it.
    pub fn check_compatible(
        &self,
        newcfg: &ChainConfig,
        head_block: u64,
    ) -> Result<(), ConfigCompatError> {
        let stored = self.transition_block();
        let new = newcfg.transition_block();

        if stored != new && (is_block_forked(stored, head_block) || is_block_forked(new, head_block))
        {
            return Err(ConfigCompatError::new(
                "PoS to PoA transition block",
                stored,
                new,
            ));
        }
        Ok(())
    }
}

/// Whether the fork scheduled at `at` is active at `head`.
fn is_block_forked(at: Option<u64>, head: u64) -> bool {
    at.is_some_and(|block| block <= head)
}

/// Structural defects in the transition configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The configured transition height is negative.
    #[error("PoS to PoA transition block cannot be negative")]
    NegativeTransitionBlock,

    /// A transition height was configured without a clique sub-config.
    #[error("PoS to PoA transition requires Clique configuration")]
    MissingCliqueConfig,
}

/// Chain configuration validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChainConfigError {
    /// The PoS to PoA transition configuration is malformed.
    #[error("invalid PoS to PoA transition configuration: {0}")]
    InvalidTransitionBlock(#[from] TransitionError),
}

/// Raised when a stored chain config and a new one disagree about a fork
/// height the chain head has already passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigCompatError {
    /// Name of the mismatching fork.
    pub what: &'static str,
    /// Height in the stored (database) config.
    pub stored_block: Option<u64>,
    /// Height in the new config.
    pub new_block: Option<u64>,
    /// Recommended rewind target: one block below the smaller height.
    pub rewind_to: u64,
}

impl ConfigCompatError {
    fn new(what: &'static str, stored_block: Option<u64>, new_block: Option<u64>) -> Self {
        let rewind_to = match (stored_block, new_block) {
            (Some(stored), Some(new)) => stored.min(new).saturating_sub(1),
            (Some(block), None) | (None, Some(block)) => block.saturating_sub(1),
            (None, None) => 0,
        };
        Self {
            what,
            stored_block,
            new_block,
            rewind_to,
        }
    }
}

impl fmt::Display for ConfigCompatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn fmt_block(block: Option<u64>) -> String {
            block.map_or_else(|| "nil".to_string(), |b| b.to_string())
        }
        write!(
            f,
            "mismatching {} in database (have {}, want {}, rewindto {})",
            self.what,
            fmt_block(self.stored_block),
            fmt_block(self.new_block),
            self.rewind_to
        )
    }
}

impl std::error::Error for ConfigCompatError {}
