//! Block primitives as the consensus engines see them.
//!
//! The engines only care about a small slice of a block: the number, the
//! consensus-reserved extra field, and the handful of header fields the
//! verification rules read. Everything else stays with the host node.

use crate::consensus::clique::{CliqueError, EXTRA_SEAL, EXTRA_VANITY};
use alloy_primitives::{Address, Bytes, B256};

/// Block header, reduced to the consensus-relevant fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    /// Block height.
    pub number: u64,
    /// Block hash as computed by the host.
    pub hash: B256,
    /// Hash of the parent block.
    pub parent_hash: B256,
    /// Beneficiary / vote target (clique reuses this field for voting).
    pub coinbase: Address,
    /// Consensus nonce (clique vote value).
    pub nonce: [u8; 8],
    /// Mix digest (must be zero under clique, prev-randao under PoS).
    pub mix_digest: B256,
    /// Consensus-reserved extra data.
    pub extra: Bytes,
    /// Timestamp (unix seconds).
    pub time: u64,
    /// Block difficulty (0 post-merge, 1 or 2 under clique).
    pub difficulty: u64,
    /// Gas limit.
    pub gas_limit: u64,
    /// Gas used.
    pub gas_used: u64,
}

impl Header {
    /// Extract the signer list from checkpoint-block extra data.
    ///
    /// Layout: 32 byte vanity prefix, 20 byte addresses, 65 byte seal suffix.
    pub fn checkpoint_signers(&self) -> Result<Vec<Address>, CliqueError> {
        if self.extra.len() < EXTRA_VANITY + EXTRA_SEAL {
            return Err(CliqueError::TruncatedExtra {
                len: self.extra.len(),
            });
        }

        let payload = &self.extra[EXTRA_VANITY..self.extra.len() - EXTRA_SEAL];
        if payload.len() % Address::len_bytes() != 0 {
            return Err(CliqueError::MisalignedSignerPayload {
                payload_len: payload.len(),
            });
        }

        Ok(payload
            .chunks(Address::len_bytes())
            .map(Address::from_slice)
            .collect())
    }

    /// Get the seal signature from the extra-data suffix.
    pub fn signature(&self) -> Result<&[u8], CliqueError> {
        if self.extra.len() < EXTRA_SEAL {
            return Err(CliqueError::TruncatedExtra {
                len: self.extra.len(),
            });
        }
        Ok(&self.extra[self.extra.len() - EXTRA_SEAL..])
    }

    /// Length of the signer payload between vanity and seal, zero when the
    /// extra field is too short to carry the checkpoint framing.
    pub fn signer_payload_len(&self) -> usize {
        self.extra.len().saturating_sub(EXTRA_VANITY + EXTRA_SEAL)
    }
}

/// Block body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    /// Encoded transactions; opaque to consensus.
    pub transactions: Vec<Bytes>,
    /// Uncle headers (forbidden under both clique and PoS).
    pub uncles: Vec<Header>,
}

/// A block as handed to the sealing and assembly operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    /// Block header.
    pub header: Header,
    /// Block body.
    pub body: Body,
}

impl Block {
    /// Create a new block from a header and body.
    pub fn new(header: Header, body: Body) -> Self {
        Self { header, body }
    }

    /// Block height.
    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// Block hash.
    pub fn hash(&self) -> B256 {
        self.header.hash
    }
}

/// Transaction receipt, reduced to what block assembly needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Receipt {
    /// Whether the transaction succeeded.
    pub success: bool,
    /// Cumulative gas used up to and including this transaction.
    pub cumulative_gas_used: u64,
}
