//! Clique consensus errors, grouped by the phase that raises them: the
//! stateless header shape checks, parent/snapshot resolution, seal authority
//! checks, and sealing itself.

use alloy_primitives::{Address, B256};
use thiserror::Error;

/// Errors raised by the clique engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CliqueError {
    // -- header shape ------------------------------------------------------
    /// The header claims a timestamp ahead of the wall clock.
    #[error("header {number} ahead of wall clock: block time {block_time}, now {now}")]
    HeaderFromFuture {
        number: u64,
        block_time: u64,
        now: u64,
    },

    /// The extra field is too short to carry the vanity prefix and seal
    /// suffix framing.
    #[error("extra field of {len} bytes cannot hold vanity and seal framing")]
    TruncatedExtra { len: usize },

    /// A non-checkpoint header carries bytes between vanity and seal.
    #[error("signer payload of {payload_len} bytes on a non-checkpoint block")]
    UnexpectedSignerPayload { payload_len: usize },

    /// A checkpoint signer payload is not a whole number of addresses.
    #[error("checkpoint signer payload of {payload_len} bytes is not whole addresses")]
    MisalignedSignerPayload { payload_len: usize },

    /// The nonce is neither the authorize nor the drop vote value.
    #[error("nonce {nonce:02x?} encodes no vote")]
    InvalidVoteNonce { nonce: [u8; 8] },

    /// Checkpoint blocks must not cast votes.
    #[error("checkpoint block carries a vote")]
    VoteOnCheckpoint,

    /// Checkpoint blocks must not name a beneficiary.
    #[error("checkpoint block pays beneficiary {beneficiary}")]
    CheckpointBeneficiary { beneficiary: Address },

    /// The mix digest is reserved and must stay zero.
    #[error("mix digest {digest} must be zero under proof-of-authority")]
    DirtyMixDigest { digest: B256 },

    /// The difficulty is neither the in-turn nor the out-of-turn value.
    #[error("difficulty {difficulty} of block {number} is neither in-turn nor out-of-turn")]
    DifficultyOutOfRange { number: u64, difficulty: u64 },

    /// The gas limit exceeds the protocol maximum.
    #[error("gas limit {gas_limit} above maximum {max}")]
    GasLimitTooHigh { gas_limit: u64, max: u64 },

    /// More gas was used than the header allows.
    #[error("gas used {gas_used} above gas limit {gas_limit}")]
    GasOveruse { gas_used: u64, gas_limit: u64 },

    /// Uncle blocks are meaningless under authority rotation.
    #[error("uncles are not allowed under proof-of-authority")]
    UnclesForbidden,

    // -- parent / snapshot resolution --------------------------------------
    /// The parent needed for verification or preparation is unavailable.
    #[error("parent of block {number} is not available")]
    MissingParent { number: u64 },

    /// The header follows its parent too closely for the configured period.
    #[error("block time {block_time} under parent {parent_time} + period {period}")]
    BlockTooEarly {
        parent_time: u64,
        period: u64,
        block_time: u64,
    },

    /// Headers replayed onto a snapshot did not form a contiguous chain.
    #[error("vote replay expected block {expected}, got {got}")]
    BrokenVoteChain { expected: u64, got: u64 },

    /// A checkpoint's embedded signer list disagrees with the snapshot.
    #[error("checkpoint signer list does not match the authority snapshot")]
    CheckpointSignersMismatch,

    /// The snapshot store failed.
    #[error("snapshot store: {reason}")]
    SnapshotStore { reason: String },

    // -- seal authority ----------------------------------------------------
    /// Genesis is never sealed and cannot be prepared for sealing.
    #[error("genesis block is outside clique sealing")]
    GenesisNotSealable,

    /// The recovered or configured sealer is not in the authority set.
    #[error("{signer} is not an authorized signer")]
    NotAuthorized { signer: Address },

    /// The sealer is still inside its recency window.
    #[error("{signer} already sealed block {last_block} inside the recency window")]
    SignedTooRecently { signer: Address, last_block: u64 },

    /// The sealed difficulty does not match the sealer's turn.
    #[error(
        "difficulty {actual} does not match {signer}'s turn at block {number} (expected {expected})"
    )]
    TurnMismatch {
        signer: Address,
        number: u64,
        expected: u64,
        actual: u64,
    },

    /// The seal signature could not be decoded or recovered.
    #[error("seal recovery: {reason}")]
    SealRecovery { reason: String },

    // -- sealing -----------------------------------------------------------
    /// Zero-period chains refuse to seal blocks without transactions.
    #[error("sealing paused until transactions arrive")]
    AwaitingTransactions,
}
