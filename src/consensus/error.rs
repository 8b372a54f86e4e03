//! Top-level consensus error sum.

use crate::{
    chainspec::ChainConfigError,
    consensus::{beacon::BeaconError, clique::CliqueError, ethash::EthashError},
};
use thiserror::Error;

/// Errors surfaced through the consensus engine contract.
///
/// Sub-engine failures are carried transparently; the hybrid router never
/// wraps or reclassifies them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A wrapped engine handle was absent at hybrid construction.
    #[error("missing consensus engine")]
    MissingEngine,

    /// Engine construction requires a post-merge chain config.
    #[error("chain config has no terminal total difficulty; only post-merge chains are supported")]
    PostMergeRequired,

    /// The chain configuration failed validation.
    #[error(transparent)]
    Config(#[from] ChainConfigError),

    /// Clique engine failure.
    #[error(transparent)]
    Clique(#[from] CliqueError),

    /// Beacon wrapper failure.
    #[error(transparent)]
    Beacon(#[from] BeaconError),

    /// Ethash engine failure.
    #[error(transparent)]
    Ethash(#[from] EthashError),
}
