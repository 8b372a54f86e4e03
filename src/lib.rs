//! Hybrid PoS to PoA consensus.
//!
//! This crate implements a consensus engine that deterministically switches a
//! post-merge chain from Proof-of-Stake to clique Proof-of-Authority at a
//! configured block height. The hybrid engine wraps two underlying engines
//! and routes every consensus operation by the block number it addresses:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Hybrid engine                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │   operation(block n)                                             │
//! │         │                                                        │
//! │         ▼                                                        │
//! │   n >= transition height ?                                       │
//! │     │ no                        │ yes                            │
//! │     ▼                           ▼                                │
//! │  ┌──────────────────┐       ┌──────────────────┐                 │
//! │  │ PoS engine       │       │ PoA engine       │                 │
//! │  │ Beacon(Clique)   │       │ Clique           │                 │
//! │  └──────────────────┘       └──────────────────┘                 │
//! │                                                                  │
//! │   Prepare(n == transition height) additionally seeds the         │
//! │   header's extra field with the initial authority set so the     │
//! │   transition block doubles as a clique checkpoint block.         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Dispatch is a pure function of the block number, so a node that has long
//! crossed the transition still verifies PoS-era ancestors with the PoS
//! engine during reorgs.
//!
//! # Modules
//!
//! - [`chainspec`]: chain configuration, transition validation, database
//!   compatibility checks
//! - [`primitives`]: the consensus view of headers and blocks
//! - [`consensus`]: the engines (clique, beacon wrapper, ethash faker), the
//!   hybrid dispatcher, and the engine factory

#![warn(unused_crate_dependencies)]

pub mod chainspec;
pub mod consensus;
pub mod primitives;

pub use chainspec::{ChainConfig, ChainConfigError, ConfigCompatError, TransitionError};
pub use primitives::{Block, Body, Header, Receipt};

pub use consensus::{
    beacon::Beacon,
    clique::{
        Clique, CliqueConfig, CliqueError, MemorySnapshotDatabase, NoopSnapshotDatabase,
        SignerFn, Snapshot, SnapshotDatabase, EXTRA_SEAL, EXTRA_VANITY,
    },
    error::EngineError,
    ethash::Ethash,
    factory::create_consensus_engine,
    hybrid::{Hybrid, INITIAL_SIGNERS},
    traits::{ChainHeaderReader, Engine, HeaderVerification, StateDb},
};
