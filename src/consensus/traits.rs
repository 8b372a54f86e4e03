//! Consensus engine trait abstractions.
//!
//! [`Engine`] is the full consensus-engine contract: every engine in this
//! crate (clique, the beacon wrapper, the ethash faker, and the hybrid
//! dispatcher itself) implements it, so a hybrid engine is indistinguishable
//! from a plain engine from the outside.

use crate::{
    chainspec::ChainConfig,
    consensus::error::EngineError,
    primitives::{Block, Body, Header, Receipt},
};
use alloy_primitives::{Address, B256, U256};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Chain header reader trait for accessing blockchain headers.
pub trait ChainHeaderReader: Send + Sync {
    /// Get the current chain configuration.
    fn config(&self) -> &ChainConfig;

    /// Get the current head header.
    fn current_header(&self) -> Option<Header>;

    /// Get header by hash and number.
    fn get_header(&self, hash: B256, number: u64) -> Option<Header>;

    /// Get header by number.
    fn get_header_by_number(&self, number: u64) -> Option<Header>;

    /// Get header by hash.
    fn get_header_by_hash(&self, hash: B256) -> Option<Header>;
}

/// Mutable state seam used by block finalization.
pub trait StateDb: Send {
    /// Credit `amount` to `address` (block rewards).
    fn add_balance(&mut self, address: Address, amount: U256);
}

/// Outcome of verifying a single header.
pub type VerifyResult = Result<(), EngineError>;

/// Handle to an in-flight batched header verification.
///
/// The engine delivers one result per header, in order, on the results side;
/// sending on the cancel side stops the engine from producing further
/// results. This is the channel pair the Go contract expresses as
/// `(chan<- struct{}, <-chan error)`.
pub struct HeaderVerification {
    cancel: watch::Sender<bool>,
    results: mpsc::UnboundedReceiver<VerifyResult>,
}

impl HeaderVerification {
    /// Create a verification handle along with the engine-side channel ends.
    pub fn channel() -> (
        Self,
        watch::Receiver<bool>,
        mpsc::UnboundedSender<VerifyResult>,
    ) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        (
            Self {
                cancel: cancel_tx,
                results: results_rx,
            },
            cancel_rx,
            results_tx,
        )
    }

    /// A verification whose results side is already closed (empty batches).
    pub fn closed() -> Self {
        let (verification, _cancel_rx, _results_tx) = Self::channel();
        verification
    }

    /// Ask the engine to stop producing results.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Block until the next result, or `None` once the engine is done.
    pub fn recv(&mut self) -> Option<VerifyResult> {
        self.results.blocking_recv()
    }

    /// Drain all remaining results.
    pub fn collect(mut self) -> Vec<VerifyResult> {
        let mut results = Vec::new();
        while let Some(result) = self.results.blocking_recv() {
            results.push(result);
        }
        results
    }
}

/// The consensus engine contract.
///
/// Engines are shared behind `Arc` across block-processing pipelines;
/// operations that hand work to a background thread therefore take
/// `self: Arc<Self>`.
pub trait Engine: Send + Sync {
    /// Concrete engine type name, for diagnostics only. Never consulted by
    /// dispatch logic.
    fn kind(&self) -> &'static str;

    /// Retrieve the address of the account that sealed the given block.
    fn author(&self, header: &Header) -> Result<Address, EngineError>;

    /// Check whether a header conforms to the consensus rules.
    fn verify_header(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &Header,
    ) -> Result<(), EngineError>;

    /// Verify a batch of headers, delivering one result per header.
    fn verify_headers(
        self: Arc<Self>,
        chain: Arc<dyn ChainHeaderReader>,
        headers: Vec<Header>,
    ) -> HeaderVerification;

    /// Verify that the given block's uncles conform to the consensus rules.
    fn verify_uncles(
        &self,
        chain: &dyn ChainHeaderReader,
        block: &Block,
    ) -> Result<(), EngineError>;

    /// Initialize the consensus fields of a block header.
    fn prepare(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &mut Header,
    ) -> Result<(), EngineError>;

    /// Run any post-transaction state modifications (block rewards).
    fn finalize(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &Header,
        state: &mut dyn StateDb,
        body: &Body,
    );

    /// Run post-transaction state modifications and assemble the final block.
    fn finalize_and_assemble(
        &self,
        chain: &dyn ChainHeaderReader,
        header: Header,
        state: &mut dyn StateDb,
        body: Body,
        receipts: &[Receipt],
    ) -> Result<Block, EngineError>;

    /// Generate a sealing request for the given block. The sealed block is
    /// delivered on `results`; `stop` aborts in-flight sealing.
    fn seal(
        self: Arc<Self>,
        chain: Arc<dyn ChainHeaderReader>,
        block: Block,
        results: mpsc::UnboundedSender<Block>,
        stop: watch::Receiver<bool>,
    ) -> Result<(), EngineError>;

    /// Hash of a header prior to sealing.
    fn seal_hash(&self, header: &Header) -> B256;

    /// Difficulty the block built on `parent` should carry.
    fn calc_difficulty(&self, chain: &dyn ChainHeaderReader, time: u64, parent: &Header) -> u64;

    /// Tear down any background resources held by the engine.
    fn close(&self) -> Result<(), EngineError>;
}
