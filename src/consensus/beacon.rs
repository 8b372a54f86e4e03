//! Beacon-style PoS wrapper engine.
//!
//! Wraps an inner engine and splits work on the merge boundary: headers with
//! a non-zero difficulty are pre-merge and delegate to the inner engine,
//! headers with difficulty zero are PoS blocks governed by the external
//! beacon protocol and get the post-merge header rules. Sealing of PoS
//! blocks happens outside this process, so `seal` is a no-op for them.

use crate::{
    consensus::{
        error::EngineError,
        traits::{ChainHeaderReader, Engine, HeaderVerification, StateDb},
    },
    primitives::{Block, Body, Header, Receipt},
};
use alloy_primitives::{Address, B256};
use std::{sync::Arc, thread};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::trace;

/// Difficulty carried by every PoS block.
pub const BEACON_DIFFICULTY: u64 = 0;

/// Maximum extra-data size accepted in a PoS header.
pub const MAXIMUM_EXTRA_DATA_SIZE: usize = 32;

/// Beacon wrapper errors for post-merge header rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BeaconError {
    /// The chain config carries no terminal total difficulty.
    #[error("terminal total difficulty not configured")]
    MissingTerminalTotalDifficulty,

    /// Post-merge headers must carry a zero nonce.
    #[error("invalid nonce: post-merge headers carry a zero nonce")]
    InvalidNonce,

    /// Post-merge extra-data is capped at 32 bytes.
    #[error("extra-data exceeds 32 bytes: {len}")]
    ExtraDataTooLong { len: usize },

    /// Timestamp does not advance past the parent.
    #[error("invalid timestamp: block {block_time} not after parent {parent_time}")]
    InvalidTimestamp { parent_time: u64, block_time: u64 },

    /// Parent header is unavailable.
    #[error("unknown ancestor")]
    UnknownAncestor,

    /// Gas used exceeds gas limit.
    #[error("invalid gasUsed: have {gas_used}, gasLimit {gas_limit}")]
    GasUsedExceeded { gas_used: u64, gas_limit: u64 },

    /// Uncles are forbidden post-merge.
    #[error("uncles not allowed in post-merge blocks")]
    UnclesNotAllowed,
}

/// Beacon-style wrapper over an inner (pre-merge) engine.
pub struct Beacon {
    /// Engine serving pre-merge headers.
    inner: Arc<dyn Engine>,
}

impl Beacon {
    /// Wrap `inner` as the pre-merge fallback engine.
    pub fn new(inner: Arc<dyn Engine>) -> Self {
        Self { inner }
    }

    /// Whether the header belongs to the PoS era.
    fn is_pos_header(header: &Header) -> bool {
        header.difficulty == BEACON_DIFFICULTY
    }

    /// Post-merge header rules.
    fn verify_pos_header(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &Header,
    ) -> Result<(), BeaconError> {
        if chain.config().terminal_total_difficulty.is_none() {
            return Err(BeaconError::MissingTerminalTotalDifficulty);
        }
        if header.nonce != [0u8; 8] {
            return Err(BeaconError::InvalidNonce);
        }
        if header.extra.len() > MAXIMUM_EXTRA_DATA_SIZE {
            return Err(BeaconError::ExtraDataTooLong {
                len: header.extra.len(),
            });
        }
        if header.gas_used > header.gas_limit {
            return Err(BeaconError::GasUsedExceeded {
                gas_used: header.gas_used,
                gas_limit: header.gas_limit,
            });
        }
        if header.number == 0 {
            return Ok(());
        }
        let parent = chain
            .get_header(header.parent_hash, header.number - 1)
            .ok_or(BeaconError::UnknownAncestor)?;
        if header.time <= parent.time {
            return Err(BeaconError::InvalidTimestamp {
                parent_time: parent.time,
                block_time: header.time,
            });
        }
        Ok(())
    }
}

impl Engine for Beacon {
    fn kind(&self) -> &'static str {
        "Beacon"
    }

    fn author(&self, header: &Header) -> Result<Address, EngineError> {
        if Self::is_pos_header(header) {
            return Ok(header.coinbase);
        }
        self.inner.author(header)
    }

    fn verify_header(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &Header,
    ) -> Result<(), EngineError> {
        if Self::is_pos_header(header) {
            return self.verify_pos_header(chain, header).map_err(Into::into);
        }
        self.inner.verify_header(chain, header)
    }

    fn verify_headers(
        self: Arc<Self>,
        chain: Arc<dyn ChainHeaderReader>,
        headers: Vec<Header>,
    ) -> HeaderVerification {
        let (verification, cancel, results) = HeaderVerification::channel();
        let engine = self;
        thread::spawn(move || {
            for header in headers {
                if *cancel.borrow() {
                    return;
                }
                let result = engine.verify_header(chain.as_ref(), &header);
                if results.send(result).is_err() {
                    return;
                }
            }
        });
        verification
    }

    fn verify_uncles(
        &self,
        chain: &dyn ChainHeaderReader,
        block: &Block,
    ) -> Result<(), EngineError> {
        if Self::is_pos_header(&block.header) {
            if !block.body.uncles.is_empty() {
                return Err(BeaconError::UnclesNotAllowed.into());
            }
            return Ok(());
        }
        self.inner.verify_uncles(chain, block)
    }

    fn prepare(
        &self,
        _chain: &dyn ChainHeaderReader,
        header: &mut Header,
    ) -> Result<(), EngineError> {
        // PoS-era nodes are a precondition; new blocks always carry the
        // beacon difficulty
        header.difficulty = BEACON_DIFFICULTY;
        Ok(())
    }

    fn finalize(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &Header,
        state: &mut dyn StateDb,
        body: &Body,
    ) {
        if Self::is_pos_header(header) {
            // No block rewards post-merge
            return;
        }
        self.inner.finalize(chain, header, state, body);
    }

    fn finalize_and_assemble(
        &self,
        chain: &dyn ChainHeaderReader,
        header: Header,
        state: &mut dyn StateDb,
        body: Body,
        receipts: &[Receipt],
    ) -> Result<Block, EngineError> {
        if Self::is_pos_header(&header) {
            return Ok(Block::new(header, body));
        }
        self.inner
            .finalize_and_assemble(chain, header, state, body, receipts)
    }

    fn seal(
        self: Arc<Self>,
        chain: Arc<dyn ChainHeaderReader>,
        block: Block,
        results: mpsc::UnboundedSender<Block>,
        stop: watch::Receiver<bool>,
    ) -> Result<(), EngineError> {
        if Self::is_pos_header(&block.header) {
            // The external protocol seals PoS blocks; nothing to deliver
            trace!(
                target: "consensus::beacon",
                block = block.number(),
                "seal requested for externally sealed block"
            );
            return Ok(());
        }
        self.inner.clone().seal(chain, block, results, stop)
    }

    fn seal_hash(&self, header: &Header) -> B256 {
        self.inner.seal_hash(header)
    }

    fn calc_difficulty(&self, chain: &dyn ChainHeaderReader, time: u64, parent: &Header) -> u64 {
        if Self::is_pos_header(parent) {
            return BEACON_DIFFICULTY;
        }
        self.inner.calc_difficulty(chain, time, parent)
    }

    fn close(&self) -> Result<(), EngineError> {
        self.inner.close()
    }
}
