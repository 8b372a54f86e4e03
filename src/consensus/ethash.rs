//! Faker-grade proof-of-work engine.
//!
//! Stand-in for a real PoW implementation on legacy configs that carry
//! neither a clique sub-config nor a transition: headers are accepted on
//! basic sanity alone, difficulty is constant, and sealing returns the block
//! unchanged. The one piece of real behaviour is the block reward paid at
//! finalization.

use crate::{
    consensus::{
        error::EngineError,
        traits::{ChainHeaderReader, Engine, HeaderVerification, StateDb},
    },
    primitives::{Block, Body, Header, Receipt},
};
use alloy_primitives::{keccak256, Address, B256, U256};
use std::{sync::Arc, thread};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Constant difficulty attached to every faked block.
pub const FAKE_DIFFICULTY: u64 = 1;

/// Block reward paid to the coinbase at finalization (2 ether in wei).
pub const BLOCK_REWARD: U256 = U256::from_limbs([0x1bc1_6d67_4ec8_0000, 0, 0, 0]);

/// Ethash faker errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EthashError {
    /// Gas used exceeds gas limit.
    #[error("invalid gasUsed: have {gas_used}, gasLimit {gas_limit}")]
    GasUsedExceeded { gas_used: u64, gas_limit: u64 },

    /// Proof-of-work headers must carry a non-zero difficulty.
    #[error("invalid difficulty: proof-of-work header with difficulty 0")]
    ZeroDifficulty,
}

/// Faker-grade proof-of-work engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ethash;

impl Ethash {
    /// Create a new faker engine.
    pub fn new() -> Self {
        Self
    }
}

impl Engine for Ethash {
    fn kind(&self) -> &'static str {
        "Ethash"
    }

    fn author(&self, header: &Header) -> Result<Address, EngineError> {
        Ok(header.coinbase)
    }

    fn verify_header(
        &self,
        _chain: &dyn ChainHeaderReader,
        header: &Header,
    ) -> Result<(), EngineError> {
        if header.number > 0 && header.difficulty == 0 {
            return Err(EthashError::ZeroDifficulty.into());
        }
        if header.gas_used > header.gas_limit {
            return Err(EthashError::GasUsedExceeded {
                gas_used: header.gas_used,
                gas_limit: header.gas_limit,
            }
            .into());
        }
        Ok(())
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
        _chain: &dyn ChainHeaderReader,
        _block: &Block,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    fn prepare(
        &self,
        _chain: &dyn ChainHeaderReader,
        header: &mut Header,
    ) -> Result<(), EngineError> {
        header.difficulty = FAKE_DIFFICULTY;
        Ok(())
    }

    fn finalize(
        &self,
        _chain: &dyn ChainHeaderReader,
        header: &Header,
        state: &mut dyn StateDb,
        _body: &Body,
    ) {
        state.add_balance(header.coinbase, BLOCK_REWARD);
    }

    fn finalize_and_assemble(
        &self,
        chain: &dyn ChainHeaderReader,
        header: Header,
        state: &mut dyn StateDb,
        body: Body,
        _receipts: &[Receipt],
    ) -> Result<Block, EngineError> {
        self.finalize(chain, &header, state, &body);
        Ok(Block::new(header, body))
    }

    fn seal(
        self: Arc<Self>,
        _chain: Arc<dyn ChainHeaderReader>,
        block: Block,
        results: mpsc::UnboundedSender<Block>,
        stop: watch::Receiver<bool>,
    ) -> Result<(), EngineError> {
        if *stop.borrow() {
            return Ok(());
        }
        // Faked proof-of-work: the block seals as-is
        let _ = results.send(block);
        Ok(())
    }

    fn seal_hash(&self, header: &Header) -> B256 {
        let mut data = Vec::new();
        data.extend_from_slice(header.parent_hash.as_slice());
        data.extend_from_slice(&header.number.to_be_bytes());
        data.extend_from_slice(&header.time.to_be_bytes());
        data.extend_from_slice(header.coinbase.as_slice());
        data.extend_from_slice(&header.difficulty.to_be_bytes());
        data.extend_from_slice(&header.extra);
        keccak256(&data)
    }

    fn calc_difficulty(&self, _chain: &dyn ChainHeaderReader, _time: u64, _parent: &Header) -> u64 {
        FAKE_DIFFICULTY
    }

    fn close(&self) -> Result<(), EngineError> {
        Ok(())
    }
}
