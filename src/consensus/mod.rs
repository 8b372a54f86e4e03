//! Consensus engines and the PoS to PoA hybrid dispatcher.
//!
//! # Components
//!
//! - [`traits::Engine`]: the consensus-engine contract
//! - [`clique`]: proof-of-authority engine (signer rotation, voting,
//!   checkpoint snapshots)
//! - [`beacon`]: beacon-style PoS wrapper over an inner engine
//! - [`ethash`]: faker-grade proof-of-work engine for legacy configs
//! - [`hybrid`]: block-number-indexed composite of a PoS and a PoA engine
//! - [`factory`]: chain-config driven engine construction

pub mod beacon;
pub mod clique;
pub mod error;
pub mod ethash;
pub mod factory;
pub mod hybrid;
pub mod traits;

pub use beacon::Beacon;
pub use clique::{Clique, CliqueConfig, CliqueError, MemorySnapshotDatabase, SnapshotDatabase};
pub use error::EngineError;
pub use ethash::Ethash;
pub use factory::create_consensus_engine;
pub use hybrid::{Hybrid, INITIAL_SIGNERS};
pub use traits::{ChainHeaderReader, Engine, HeaderVerification, StateDb, VerifyResult};
