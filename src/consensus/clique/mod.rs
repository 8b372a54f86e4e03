//! Clique proof-of-authority consensus engine.
//!
//! A known set of signers seals blocks in rotation, votes members in and out
//! through the header's coinbase/nonce fields, and republishes the full
//! authority list on epoch checkpoint blocks. Authority snapshots live
//! behind a storage trait so tests run entirely in memory.

mod clique;
mod database;
mod error;
mod snapshot;

pub use clique::{Clique, SignerFn};
pub use database::{MemorySnapshotDatabase, NoopSnapshotDatabase, SnapshotDatabase};
pub use error::CliqueError;
pub use snapshot::{CliqueConfig, Snapshot, Tally, Vote};

/// Fixed number of extra-data prefix bytes reserved for signer vanity.
pub const EXTRA_VANITY: usize = 32;

/// Fixed number of extra-data suffix bytes reserved for the sealer's
/// 65 byte recoverable signature.
pub const EXTRA_SEAL: usize = 65;

/// Epoch length applied when the genesis config leaves it at zero.
pub const DEFAULT_EPOCH: u64 = 30000;

/// Interval, in blocks, at which authority snapshots are persisted.
pub const CHECKPOINT_INTERVAL: u64 = 1024;

/// Capacity of the in-memory snapshot cache.
pub const SNAPSHOT_CACHE_SIZE: usize = 128;

/// Capacity of the in-memory sealer-recovery cache.
pub const SEALER_CACHE_SIZE: usize = 4096;

/// Maximum gas limit accepted in a header.
pub const MAX_GAS_LIMIT: u64 = 0x7fff_ffff_ffff_ffff;

/// Block difficulty claimed by an in-turn sealer.
pub const DIFF_IN_TURN: u64 = 2;

/// Block difficulty claimed by an out-of-turn sealer.
pub const DIFF_NO_TURN: u64 = 1;

/// Per-signer delay granted to out-of-turn sealers before publishing.
pub const WIGGLE_TIME_MILLIS: u64 = 500;

/// Nonce value voting to authorize the header's beneficiary.
pub const NONCE_AUTH_VOTE: [u8; 8] = [0xff; 8];

/// Nonce value voting to drop the header's beneficiary.
pub const NONCE_DROP_VOTE: [u8; 8] = [0x00; 8];

/// Number of consecutive blocks a sealer sits out after sealing, for a
/// signer set of the given size.
pub(crate) fn recency_window(signer_count: usize) -> u64 {
    (signer_count / 2 + 1) as u64
}
