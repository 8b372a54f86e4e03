//! Hybrid consensus engine that transitions from PoS to PoA at a configured
//! block height.
//!
//! The hybrid owns two engines and routes every consensus operation to
//! exactly one of them based on the block number carried by the operation's
//! argument: blocks below the transition height belong to the PoS engine,
//! blocks at or above it to the PoA engine. Selection is a pure function of
//! `(block number, transition height)` — never of the node's current head —
//! so PoS-era ancestors verify correctly during reorgs long after the
//! transition.
//!
//! Preparing the single block at the transition height additionally seeds
//! the header's extra field with the initial authority set, making the
//! transition block a clique checkpoint block and bootstrapping PoA without
//! a restart.

use crate::{
    consensus::{
        clique::{EXTRA_SEAL, EXTRA_VANITY},
        error::EngineError,
        traits::{ChainHeaderReader, Engine, HeaderVerification, StateDb},
    },
    primitives::{Block, Body, Header, Receipt},
};
use alloy_primitives::{address, Address, B256};
use parking_lot::RwLock;
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

/// Initial authority set installed at the transition block.
///
/// Replace these placeholder addresses with the production validator set
/// before deployment; the list is consensus-critical from the transition
/// block onward and every node must be built with the same one.
pub const INITIAL_SIGNERS: [Address; 3] = [
    address!("1234567890123456789012345678901234567890"),
    address!("2345678901234567890123456789012345678901"),
    address!("3456789012345678901234567890123456789012"),
];

/// Suppression window for repeated engine-selection log events.
const LOG_SUPPRESSION: Duration = Duration::from_secs(10);

/// Observability bookkeeping. Never consulted by dispatch.
#[derive(Debug, Default)]
struct DispatchDiagnostics {
    /// Whether the one-shot transition event has been emitted.
    transition_logged: bool,
    /// Engine label of the last selection log.
    last_engine: Option<&'static str>,
    /// Time of the last selection log.
    last_log_at: Option<Instant>,
}

/// Composite engine dispatching between a PoS and a PoA engine by block
/// number. Immutable after construction apart from diagnostic state.
pub struct Hybrid {
    /// Engine serving blocks below the transition height.
    pos_engine: Arc<dyn Engine>,
    /// Engine serving blocks at or above the transition height.
    poa_engine: Arc<dyn Engine>,
    /// Height at which dispatch switches from PoS to PoA.
    transition_block: u64,
    /// Authority set written into the transition block's extra field.
    initial_signers: &'static [Address],
    /// Log rate-limiting state, behind a short-critical-section lock.
    diag: RwLock<DispatchDiagnostics>,
}

impl Hybrid {
    /// Create a new hybrid engine switching from `pos_engine` to
    /// `poa_engine` at `transition_block`.
    ///
    /// A transition at block 0 (genesis) is valid. Either engine being
    /// absent is a construction error.
    pub fn new(
        pos_engine: Option<Arc<dyn Engine>>,
        poa_engine: Option<Arc<dyn Engine>>,
        transition_block: u64,
    ) -> Result<Self, EngineError> {
        let pos_engine = pos_engine.ok_or(EngineError::MissingEngine)?;
        let poa_engine = poa_engine.ok_or(EngineError::MissingEngine)?;

        info!(
            target: "consensus::hybrid",
            transition_block,
            initial_signers = INITIAL_SIGNERS.len(),
            pos_engine = pos_engine.kind(),
            poa_engine = poa_engine.kind(),
            "created hybrid consensus engine"
        );

        Ok(Self {
            pos_engine,
            poa_engine,
            transition_block,
            initial_signers: &INITIAL_SIGNERS,
            diag: RwLock::new(DispatchDiagnostics::default()),
        })
    }

    /// The configured transition height.
    pub fn transition_block(&self) -> u64 {
        self.transition_block
    }

    /// The authority set seeded at the transition block.
    pub fn initial_signers(&self) -> &[Address] {
        self.initial_signers
    }

    /// Whether `number` falls in the PoA era. Pure: depends only on the
    /// block number and the immutable transition height.
    fn use_poa(&self, number: u64) -> bool {
        number >= self.transition_block
    }

    /// Select the engine responsible for `number` and record diagnostics.
    fn select_engine(&self, number: u64) -> &Arc<dyn Engine> {
        let use_poa = self.use_poa(number);
        self.log_selection(number, use_poa);
        if use_poa {
            &self.poa_engine
        } else {
            &self.pos_engine
        }
    }

    /// Emit the one-shot transition event and the rate-limited selection
    /// event. Runs entirely off the correctness path.
    fn log_selection(&self, number: u64, use_poa: bool) {
        if number == self.transition_block && !self.diag.read().transition_logged {
            let mut diag = self.diag.write();
            if !diag.transition_logged {
                diag.transition_logged = true;
                drop(diag);
                info!(
                    target: "consensus::hybrid",
                    block_number = number,
                    transition_block = self.transition_block,
                    from = "PoS",
                    to = "PoA",
                    engine = self.poa_engine.kind(),
                    "consensus engine transition occurred"
                );
                warn!(
                    target: "consensus::hybrid",
                    at_block = number,
                    transition_block = self.transition_block,
                    "switched from PoS to PoA consensus"
                );
            }
        }

        let engine_label = if use_poa { "PoA" } else { "PoS" };
        let now = Instant::now();
        let stale = {
            let diag = self.diag.read();
            diag.last_engine != Some(engine_label)
                || diag
                    .last_log_at
                    .map_or(true, |at| now.duration_since(at) > LOG_SUPPRESSION)
        };
        if stale {
            {
                let mut diag = self.diag.write();
                diag.last_engine = Some(engine_label);
                diag.last_log_at = Some(now);
            }
            let engine = if use_poa {
                &self.poa_engine
            } else {
                &self.pos_engine
            };
            debug!(
                target: "consensus::hybrid",
                block_number = number,
                engine = engine_label,
                engine_type = engine.kind(),
                transition_block = self.transition_block,
                "using consensus engine"
            );
        }
    }

    /// Enrich a propagated sub-engine failure with dispatch context.
    fn log_failure(
        &self,
        operation: &'static str,
        number: u64,
        hash: Option<B256>,
        engine_kind: &'static str,
        err: &EngineError,
    ) {
        error!(
            target: "consensus::hybrid",
            operation,
            block_number = number,
            block_hash = ?hash,
            engine = engine_kind,
            transition_block = self.transition_block,
            past_transition = number >= self.transition_block,
            %err,
            "consensus operation failed"
        );
    }

    /// Seed the transition block's extra field with the initial authority
    /// set in checkpoint layout, then let the PoA engine finish preparation.
    fn prepare_transition_block(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &mut Header,
    ) -> Result<(), EngineError> {
        let number = header.number;

        // Checkpoint layout: zero vanity, signer addresses in declared
        // order, zero seal
        let mut extra = vec![
            0u8;
            EXTRA_VANITY + self.initial_signers.len() * Address::len_bytes() + EXTRA_SEAL
        ];
        for (index, signer) in self.initial_signers.iter().enumerate() {
            let offset = EXTRA_VANITY + index * Address::len_bytes();
            extra[offset..offset + Address::len_bytes()].copy_from_slice(signer.as_slice());
            trace!(
                target: "consensus::hybrid",
                index,
                %signer,
                block_number = number,
                "embedded initial signer in transition block"
            );
        }
        header.extra = extra.into();

        info!(
            target: "consensus::hybrid",
            block_number = number,
            signers = self.initial_signers.len(),
            extra_len = header.extra.len(),
            "seeded transition block extra-data"
        );

        // The PoA engine fills in the remaining checkpoint fields
        let result = self.poa_engine.prepare(chain, header);
        if let Err(err) = &result {
            self.log_failure(
                "prepare_transition",
                number,
                None,
                self.poa_engine.kind(),
                err,
            );
        }
        result
    }
}

impl Engine for Hybrid {
    fn kind(&self) -> &'static str {
        "Hybrid"
    }

    fn author(&self, header: &Header) -> Result<Address, EngineError> {
        let number = header.number;
        let engine = self.select_engine(number);
        let result = engine.author(header);
        if let Err(err) = &result {
            self.log_failure("author", number, Some(header.hash), engine.kind(), err);
        }
        result
    }

    fn verify_header(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &Header,
    ) -> Result<(), EngineError> {
        // Dispatch on the era of the header being verified, never on the
        // node's current head: a reorg may hand us a PoS-era ancestor long
        // after the transition, and the PoA engine would reject its
        // unconstrained extra field.
        let number = header.number;
        let engine = self.select_engine(number);
        let result = engine.verify_header(chain, header);
        if let Err(err) = &result {
            self.log_failure("verify_header", number, Some(header.hash), engine.kind(), err);
        }
        result
    }

    fn verify_headers(
        self: Arc<Self>,
        chain: Arc<dyn ChainHeaderReader>,
        headers: Vec<Header>,
    ) -> HeaderVerification {
        if headers.is_empty() {
            return HeaderVerification::closed();
        }

        // Bulk-forward when every header lies on one side of the boundary
        if headers.iter().all(|header| !self.use_poa(header.number)) {
            return self.pos_engine.clone().verify_headers(chain, headers);
        }
        if headers.iter().all(|header| self.use_poa(header.number)) {
            return self.poa_engine.clone().verify_headers(chain, headers);
        }

        // The batch straddles the transition: dispatch per header so each
        // era is served by its own engine, one result per header, stopping
        // as soon as cancellation is observed
        let (verification, cancel, results) = HeaderVerification::channel();
        let hybrid = self;
        thread::spawn(move || {
            for header in headers {
                if *cancel.borrow() {
                    return;
                }
                let result = hybrid.verify_header(chain.as_ref(), &header);
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
        let number = block.number();
        let engine = self.select_engine(number);
        let result = engine.verify_uncles(chain, block);
        if let Err(err) = &result {
            self.log_failure("verify_uncles", number, Some(block.hash()), engine.kind(), err);
        }
        result
    }

    fn prepare(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &mut Header,
    ) -> Result<(), EngineError> {
        let number = header.number;

        // Exactly the block at the transition height doubles as the PoA
        // checkpoint seed; every other block takes the normal dispatch path
        if number == self.transition_block {
            info!(
                target: "consensus::hybrid",
                block_number = number,
                transition_block = self.transition_block,
                signers = self.initial_signers.len(),
                "preparing PoS to PoA transition block"
            );
            warn!(
                target: "consensus::hybrid",
                block_number = number,
                signer_count = self.initial_signers.len(),
                "preparing consensus transition block"
            );
            return self.prepare_transition_block(chain, header);
        }

        let engine = self.select_engine(number);
        let result = engine.prepare(chain, header);
        if let Err(err) = &result {
            self.log_failure("prepare", number, None, engine.kind(), err);
        }
        result
    }

    fn finalize(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &Header,
        state: &mut dyn StateDb,
        body: &Body,
    ) {
        let engine = self.select_engine(header.number);
        engine.finalize(chain, header, state, body);
    }

    fn finalize_and_assemble(
        &self,
        chain: &dyn ChainHeaderReader,
        header: Header,
        state: &mut dyn StateDb,
        body: Body,
        receipts: &[Receipt],
    ) -> Result<Block, EngineError> {
        let number = header.number;
        let engine = self.select_engine(number);
        let result = engine.finalize_and_assemble(chain, header, state, body, receipts);
        if let Err(err) = &result {
            self.log_failure("finalize_and_assemble", number, None, engine.kind(), err);
        }
        result
    }

    fn seal(
        self: Arc<Self>,
        chain: Arc<dyn ChainHeaderReader>,
        block: Block,
        results: mpsc::UnboundedSender<Block>,
        stop: watch::Receiver<bool>,
    ) -> Result<(), EngineError> {
        let number = block.number();
        let engine = self.select_engine(number).clone();

        debug!(
            target: "consensus::hybrid",
            block_number = number,
            block_hash = %block.hash(),
            engine = engine.kind(),
            transition_block = self.transition_block,
            past_transition = self.use_poa(number),
            "sealing block"
        );

        let kind = engine.kind();
        let result = engine.seal(chain, block, results, stop);
        if let Err(err) = &result {
            self.log_failure("seal", number, None, kind, err);
        }
        result
    }

    fn seal_hash(&self, header: &Header) -> B256 {
        self.select_engine(header.number).seal_hash(header)
    }

    fn calc_difficulty(&self, chain: &dyn ChainHeaderReader, time: u64, parent: &Header) -> u64 {
        // The parent belongs to the block being produced: dispatch on the
        // child's height
        let next_number = parent.number.saturating_add(1);
        self.select_engine(next_number)
            .calc_difficulty(chain, time, parent)
    }

    fn close(&self) -> Result<(), EngineError> {
        info!(
            target: "consensus::hybrid",
            transition_block = self.transition_block,
            pos_engine = self.pos_engine.kind(),
            poa_engine = self.poa_engine.kind(),
            "closing hybrid consensus engine"
        );

        let pos_result = self.pos_engine.close();
        if let Err(err) = &pos_result {
            error!(
                target: "consensus::hybrid",
                engine = self.pos_engine.kind(),
                %err,
                "failed to close PoS engine"
            );
        }
        let poa_result = self.poa_engine.close();
        if let Err(err) = &poa_result {
            error!(
                target: "consensus::hybrid",
                engine = self.poa_engine.kind(),
                %err,
                "failed to close PoA engine"
            );
        }

        // First failure wins, but both engines were asked to close
        pos_result.and(poa_result)
    }
}
