//! Clique proof-of-authority consensus engine implementation.

use super::{
    database::SnapshotDatabase,
    error::CliqueError,
    recency_window,
    snapshot::{CliqueConfig, Snapshot},
    CHECKPOINT_INTERVAL, DEFAULT_EPOCH, DIFF_IN_TURN, DIFF_NO_TURN, EXTRA_SEAL, EXTRA_VANITY,
    MAX_GAS_LIMIT, NONCE_AUTH_VOTE, NONCE_DROP_VOTE, SEALER_CACHE_SIZE, SNAPSHOT_CACHE_SIZE,
    WIGGLE_TIME_MILLIS,
};
use crate::{
    consensus::{
        error::EngineError,
        traits::{ChainHeaderReader, Engine, HeaderVerification, StateDb},
    },
    primitives::{Block, Body, Header, Receipt},
};
use alloy_primitives::{keccak256, Address, B256};
use lru::LruCache;
use parking_lot::RwLock;
use rand::Rng;
use secp256k1::{ecdsa, PublicKey, Secp256k1};
use std::{
    collections::HashMap,
    fmt::Display,
    num::NonZeroUsize,
    sync::Arc,
    thread,
    time::{Duration, Instant, SystemTime},
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

/// Replay depth past which an epoch checkpoint is trusted as a snapshot
/// anchor instead of walking further back.
const MAX_REPLAY_DEPTH: usize = 90000;

/// Poll interval for the stop channel while waiting out the sealing delay.
const STOP_POLL: Duration = Duration::from_millis(25);

/// Callback signing a seal hash on behalf of an authorized account.
pub type SignerFn = Arc<dyn Fn(Address, &B256) -> Result<[u8; 65], CliqueError> + Send + Sync>;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Wrap a crypto-layer failure as a seal recovery error.
fn seal_recovery(err: impl Display) -> CliqueError {
    CliqueError::SealRecovery {
        reason: err.to_string(),
    }
}

/// Split a 65 byte seal into its recovery id and 64 byte compact signature.
/// Legacy seals encode the recovery id as 27/28.
fn split_seal(seal: &[u8]) -> Result<(ecdsa::RecoveryId, &[u8]), CliqueError> {
    let [compact @ .., v] = seal else {
        return Err(CliqueError::TruncatedExtra { len: seal.len() });
    };
    if compact.len() != 64 {
        return Err(CliqueError::TruncatedExtra { len: seal.len() });
    }
    let v = v.checked_sub(27).unwrap_or(*v);
    let recovery_id = ecdsa::RecoveryId::try_from(v as i32).map_err(seal_recovery)?;
    Ok((recovery_id, compact))
}

/// Keccak-derived account address of a public key.
fn pubkey_to_address(pubkey: &PublicKey) -> Address {
    let uncompressed = pubkey.serialize_uncompressed();
    Address::from_slice(&keccak256(&uncompressed[1..])[12..])
}

/// Clique proof-of-authority consensus engine.
pub struct Clique<DB: SnapshotDatabase> {
    /// Consensus engine configuration.
    config: CliqueConfig,

    /// Persistent store for authority snapshots.
    db: Arc<DB>,

    /// Recently resolved snapshots, keyed by block hash.
    snapshots: RwLock<LruCache<B256, Snapshot>>,

    /// Recently recovered sealers, keyed by block hash.
    sealers: RwLock<LruCache<B256, Address>>,

    /// Authorization proposals this node is pushing.
    proposals: RwLock<HashMap<Address, bool>>,

    /// Sealing account and its signing callback, once authorized.
    signer: RwLock<Option<(Address, SignerFn)>>,

    /// Secp256k1 context for signature operations.
    secp: Secp256k1<secp256k1::All>,

    /// Skip difficulty verifications (for testing).
    fake_diff: bool,
}

impl<DB: SnapshotDatabase> Clique<DB> {
    /// Create a new clique consensus engine.
    pub fn new(mut config: CliqueConfig, db: Arc<DB>) -> Self {
        // Epoch 0 in a genesis file means "use the default epoch"
        if config.epoch == 0 {
            config.epoch = DEFAULT_EPOCH;
        }
        Self {
            config,
            db,
            snapshots: RwLock::new(LruCache::new(
                NonZeroUsize::new(SNAPSHOT_CACHE_SIZE).expect("nonzero"),
            )),
            sealers: RwLock::new(LruCache::new(
                NonZeroUsize::new(SEALER_CACHE_SIZE).expect("nonzero"),
            )),
            proposals: RwLock::new(HashMap::new()),
            signer: RwLock::new(None),
            secp: Secp256k1::new(),
            fake_diff: false,
        }
    }

    /// Create a new clique engine with fake difficulty (for testing).
    pub fn new_fake_diff(config: CliqueConfig, db: Arc<DB>) -> Self {
        let mut engine = Self::new(config, db);
        engine.fake_diff = true;
        engine
    }

    /// Get the configuration.
    pub fn config(&self) -> &CliqueConfig {
        &self.config
    }

    /// Inject the account and callback used to seal blocks.
    pub fn authorize(&self, signer: Address, sign_fn: SignerFn) {
        *self.signer.write() = Some((signer, sign_fn));
    }

    /// Get the currently authorized signer, if any.
    pub fn signer(&self) -> Option<Address> {
        self.signer.read().as_ref().map(|(address, _)| *address)
    }

    /// Propose to authorize or deauthorize an address.
    pub fn propose(&self, address: Address, authorize: bool) {
        self.proposals.write().insert(address, authorize);
    }

    /// Remove a proposal.
    pub fn discard(&self, address: Address) {
        self.proposals.write().remove(&address);
    }

    /// Whether `number` sits on an epoch boundary.
    fn is_epoch_checkpoint(&self, number: u64) -> bool {
        number % self.config.epoch == 0
    }

    /// Resolve the account that sealed `header`.
    pub fn ecrecover(&self, header: &Header) -> Result<Address, CliqueError> {
        if let Some(cached) = self.sealers.write().get(&header.hash).copied() {
            return Ok(cached);
        }

        let (recovery_id, compact) = split_seal(header.signature()?)?;
        let signature =
            ecdsa::RecoverableSignature::from_compact(compact, recovery_id).map_err(seal_recovery)?;
        let digest = secp256k1::Message::from_digest_slice(self.seal_hash_of(header).as_slice())
            .map_err(seal_recovery)?;
        let pubkey = self
            .secp
            .recover_ecdsa(&digest, &signature)
            .map_err(seal_recovery)?;
        let sealer = pubkey_to_address(&pubkey);

        self.sealers.write().put(header.hash, sealer);
        Ok(sealer)
    }

    /// Hash of the header content covered by the seal (everything except the
    /// 65 byte signature suffix of the extra field).
    pub fn seal_hash_of(&self, header: &Header) -> B256 {
        let mut data = Vec::new();
        data.extend_from_slice(header.parent_hash.as_slice());
        data.extend_from_slice(&header.number.to_be_bytes());
        data.extend_from_slice(&header.time.to_be_bytes());
        data.extend_from_slice(header.coinbase.as_slice());
        data.extend_from_slice(&header.nonce);
        data.extend_from_slice(header.mix_digest.as_slice());
        data.extend_from_slice(&header.difficulty.to_be_bytes());
        data.extend_from_slice(&header.gas_limit.to_be_bytes());
        data.extend_from_slice(&header.gas_used.to_be_bytes());
        if header.extra.len() >= EXTRA_SEAL {
            data.extend_from_slice(&header.extra[..header.extra.len() - EXTRA_SEAL]);
        }
        keccak256(&data)
    }

    /// Resolve the authority snapshot in force after block `(number, hash)`.
    pub fn snapshot(
        &self,
        chain: &dyn ChainHeaderReader,
        number: u64,
        hash: B256,
        parents: Option<&[Header]>,
    ) -> Result<Snapshot, CliqueError> {
        let (anchor, replay) = self.snapshot_anchor(chain, number, hash, parents)?;

        let replayed = !replay.is_empty();
        let snap = if replayed {
            anchor.apply(&replay, |header| self.ecrecover(header))?
        } else {
            anchor
        };

        self.snapshots.write().put(snap.hash, snap.clone());
        if replayed && snap.number % CHECKPOINT_INTERVAL == 0 {
            self.db.insert(&snap)?;
        }
        Ok(snap)
    }

    /// Walk back from `(number, hash)` to the nearest snapshot anchor (cache
    /// hit, persisted checkpoint, or seedable checkpoint header) and return
    /// it with the headers to replay on top, oldest first.
    fn snapshot_anchor(
        &self,
        chain: &dyn ChainHeaderReader,
        mut number: u64,
        mut hash: B256,
        parents: Option<&[Header]>,
    ) -> Result<(Snapshot, Vec<Header>), CliqueError> {
        let mut replay: Vec<Header> = Vec::new();

        let anchor = loop {
            if let Some(cached) = self.snapshots.write().get(&hash) {
                break cached.clone();
            }

            if number % CHECKPOINT_INTERVAL == 0 {
                if let Some(mut stored) = self.db.get(hash)? {
                    stored.config = self.config;
                    break stored;
                }
            }

            // Genesis, and epoch checkpoints whose ancestry is pruned or
            // unreasonably deep, seed a fresh snapshot from their own
            // signer list
            if self.is_snapshot_root(chain, number, replay.len()) {
                if let Some(root) = chain.get_header_by_number(number) {
                    let seeded =
                        Snapshot::new(self.config, number, root.hash, root.checkpoint_signers()?);
                    self.db.insert(&seeded)?;
                    break seeded;
                }
            }

            let header = lookup_header(chain, parents, hash, number)
                .ok_or(CliqueError::MissingParent { number })?;
            hash = header.parent_hash;
            number = number.saturating_sub(1);
            replay.push(header);
        };

        replay.reverse();
        Ok((anchor, replay))
    }

    /// Whether a snapshot walk may stop at `number` and seed from the header
    /// found there.
    fn is_snapshot_root(
        &self,
        chain: &dyn ChainHeaderReader,
        number: u64,
        walked: usize,
    ) -> bool {
        if number == 0 {
            return true;
        }
        self.is_epoch_checkpoint(number)
            && (walked > MAX_REPLAY_DEPTH || chain.get_header_by_number(number - 1).is_none())
    }

    /// Verify a header conforms to the consensus rules.
    pub fn verify_header_inner(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &Header,
        parents: Option<&[Header]>,
    ) -> Result<(), CliqueError> {
        self.check_header_shape(header)?;
        self.verify_against_parent(chain, header, parents)
    }

    /// Stateless shape checks: everything decidable from the header alone.
    fn check_header_shape(&self, header: &Header) -> Result<(), CliqueError> {
        let now = unix_now();
        if header.time > now {
            return Err(CliqueError::HeaderFromFuture {
                number: header.number,
                block_time: header.time,
                now,
            });
        }

        // Extra framing: vanity and seal always, a signer payload only on
        // checkpoints and only in whole addresses
        let extra_len = header.extra.len();
        if extra_len < EXTRA_VANITY + EXTRA_SEAL {
            return Err(CliqueError::TruncatedExtra { len: extra_len });
        }
        let payload_len = extra_len - EXTRA_VANITY - EXTRA_SEAL;
        let checkpoint = self.is_epoch_checkpoint(header.number);
        if !checkpoint && payload_len != 0 {
            return Err(CliqueError::UnexpectedSignerPayload { payload_len });
        }
        if checkpoint && payload_len % Address::len_bytes() != 0 {
            return Err(CliqueError::MisalignedSignerPayload { payload_len });
        }

        // Votes ride in the nonce; checkpoints must stay vote-free
        if header.nonce != NONCE_AUTH_VOTE && header.nonce != NONCE_DROP_VOTE {
            return Err(CliqueError::InvalidVoteNonce {
                nonce: header.nonce,
            });
        }
        if checkpoint {
            if header.nonce != NONCE_DROP_VOTE {
                return Err(CliqueError::VoteOnCheckpoint);
            }
            if header.coinbase != Address::ZERO {
                return Err(CliqueError::CheckpointBeneficiary {
                    beneficiary: header.coinbase,
                });
            }
        }

        if header.mix_digest != B256::ZERO {
            return Err(CliqueError::DirtyMixDigest {
                digest: header.mix_digest,
            });
        }

        if header.number > 0
            && header.difficulty != DIFF_IN_TURN
            && header.difficulty != DIFF_NO_TURN
        {
            return Err(CliqueError::DifficultyOutOfRange {
                number: header.number,
                difficulty: header.difficulty,
            });
        }

        if header.gas_used > header.gas_limit {
            return Err(CliqueError::GasOveruse {
                gas_used: header.gas_used,
                gas_limit: header.gas_limit,
            });
        }
        if header.gas_limit > MAX_GAS_LIMIT {
            return Err(CliqueError::GasLimitTooHigh {
                gas_limit: header.gas_limit,
                max: MAX_GAS_LIMIT,
            });
        }

        Ok(())
    }

    /// Checks that need the parent and the authority snapshot.
    fn verify_against_parent(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &Header,
        parents: Option<&[Header]>,
    ) -> Result<(), CliqueError> {
        let number = header.number;

        // Genesis carries no seal and nothing to check against
        if number == 0 {
            return Ok(());
        }

        let parent = match parents {
            Some(batch) => batch.last().cloned(),
            None => chain.get_header(header.parent_hash, number - 1),
        }
        .ok_or(CliqueError::MissingParent { number })?;

        if parent.time + self.config.period > header.time {
            return Err(CliqueError::BlockTooEarly {
                parent_time: parent.time,
                period: self.config.period,
                block_time: header.time,
            });
        }

        let snap = self.snapshot(chain, number - 1, header.parent_hash, parents)?;

        // A checkpoint must republish exactly the snapshot's signer list
        if self.is_epoch_checkpoint(number)
            && snap.ordered_signers() != header.checkpoint_signers()?
        {
            return Err(CliqueError::CheckpointSignersMismatch);
        }

        self.verify_seal(&snap, header)
    }

    /// Verify the seal against the authority snapshot: the sealer must be
    /// authorized, outside its recency window, and claim its turn honestly.
    fn verify_seal(&self, snap: &Snapshot, header: &Header) -> Result<(), CliqueError> {
        let number = header.number;
        if number == 0 {
            return Err(CliqueError::GenesisNotSealable);
        }

        let sealer = self.ecrecover(header)?;
        if !snap.is_authorized(&sealer) {
            return Err(CliqueError::NotAuthorized { signer: sealer });
        }

        let window = recency_window(snap.signer_count());
        for (&sealed_at, &recent) in &snap.recent_sealers {
            if recent == sealer && sealed_at > number.saturating_sub(window) {
                return Err(CliqueError::SignedTooRecently {
                    signer: sealer,
                    last_block: sealed_at,
                });
            }
        }

        if !self.fake_diff {
            let expected = snap.calc_difficulty(number, sealer);
            if header.difficulty != expected {
                return Err(CliqueError::TurnMismatch {
                    signer: sealer,
                    number,
                    expected,
                    actual: header.difficulty,
                });
            }
        }

        Ok(())
    }

    /// Prepare the consensus fields of `header` for sealing.
    fn prepare_inner(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &mut Header,
    ) -> Result<(), CliqueError> {
        let number = header.number;
        if number == 0 {
            return Err(CliqueError::GenesisNotSealable);
        }
        let parent = chain
            .get_header(header.parent_hash, number - 1)
            .ok_or(CliqueError::MissingParent { number })?;

        // A header arriving with a well-formed signer payload is an
        // externally seeded checkpoint: the embedded list is authoritative,
        // so keep it and only normalize the remaining consensus fields.
        let seeded = header.checkpoint_signers().ok().filter(|s| !s.is_empty());
        if let Some(signers) = seeded {
            header.coinbase = Address::ZERO;
            header.nonce = NONCE_DROP_VOTE;
            header.mix_digest = B256::ZERO;
            header.difficulty = match self.signer() {
                Some(signer) if signers.contains(&signer) => {
                    let offset = signers.iter().position(|s| *s == signer).unwrap_or(0);
                    if number % signers.len() as u64 == offset as u64 {
                        DIFF_IN_TURN
                    } else {
                        DIFF_NO_TURN
                    }
                }
                _ => DIFF_IN_TURN,
            };
            header.time = (parent.time + self.config.period).max(unix_now());

            // Zero the seal suffix; sealing fills it in later
            let mut extra = header.extra.to_vec();
            let seal_start = extra.len() - EXTRA_SEAL;
            extra[seal_start..].fill(0);
            header.extra = extra.into();
            return Ok(());
        }

        let snap = self.snapshot(chain, number - 1, header.parent_hash, None)?;
        let checkpoint = self.is_epoch_checkpoint(number);

        // If the block isn't a checkpoint, cast a vote for a pending proposal
        let (coinbase, nonce) = if checkpoint {
            (Address::ZERO, NONCE_DROP_VOTE)
        } else {
            let proposals = self.proposals.read();
            let candidates: Vec<(Address, bool)> = proposals
                .iter()
                .filter(|(address, &authorize)| snap.valid_vote(address, authorize))
                .map(|(&address, &authorize)| (address, authorize))
                .collect();
            if candidates.is_empty() {
                (Address::ZERO, NONCE_DROP_VOTE)
            } else {
                let (address, authorize) =
                    candidates[rand::thread_rng().gen_range(0..candidates.len())];
                (
                    address,
                    if authorize {
                        NONCE_AUTH_VOTE
                    } else {
                        NONCE_DROP_VOTE
                    },
                )
            }
        };
        header.coinbase = coinbase;
        header.nonce = nonce;

        let signer = self.signer().unwrap_or(Address::ZERO);
        header.difficulty = snap.calc_difficulty(number, signer);

        // Extra: vanity prefix, signer list on checkpoints, seal reservation
        let mut extra = header.extra.to_vec();
        if extra.len() < EXTRA_VANITY {
            extra.resize(EXTRA_VANITY, 0);
        }
        extra.truncate(EXTRA_VANITY);
        if checkpoint {
            for signer in snap.ordered_signers() {
                extra.extend_from_slice(signer.as_slice());
            }
        }
        extra.extend_from_slice(&[0u8; EXTRA_SEAL]);
        header.extra = extra.into();

        header.mix_digest = B256::ZERO;
        header.time = (parent.time + self.config.period).max(unix_now());
        Ok(())
    }
}

/// Find a header either in the batch being verified or in the chain.
fn lookup_header(
    chain: &dyn ChainHeaderReader,
    parents: Option<&[Header]>,
    hash: B256,
    number: u64,
) -> Option<Header> {
    match parents {
        Some(batch) => batch
            .iter()
            .find(|h| h.hash == hash && h.number == number)
            .cloned(),
        None => chain.get_header(hash, number),
    }
}

impl<DB: SnapshotDatabase + 'static> Engine for Clique<DB> {
    fn kind(&self) -> &'static str {
        "Clique"
    }

    fn author(&self, header: &Header) -> Result<Address, EngineError> {
        self.ecrecover(header).map_err(Into::into)
    }

    fn verify_header(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &Header,
    ) -> Result<(), EngineError> {
        self.verify_header_inner(chain, header, None)
            .map_err(Into::into)
    }

    fn verify_headers(
        self: Arc<Self>,
        chain: Arc<dyn ChainHeaderReader>,
        headers: Vec<Header>,
    ) -> HeaderVerification {
        let (verification, cancel, results) = HeaderVerification::channel();
        let engine = self;
        thread::spawn(move || {
            let mut parents: Vec<Header> = Vec::new();
            for header in headers {
                if *cancel.borrow() {
                    return;
                }
                let batch_parents = if parents.is_empty() {
                    None
                } else {
                    Some(parents.as_slice())
                };
                let result = engine
                    .verify_header_inner(chain.as_ref(), &header, batch_parents)
                    .map_err(EngineError::from);
                parents.push(header);
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
        block: &Block,
    ) -> Result<(), EngineError> {
        if !block.body.uncles.is_empty() {
            return Err(CliqueError::UnclesForbidden.into());
        }
        Ok(())
    }

    fn prepare(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &mut Header,
    ) -> Result<(), EngineError> {
        self.prepare_inner(chain, header).map_err(Into::into)
    }

    fn finalize(
        &self,
        _chain: &dyn ChainHeaderReader,
        _header: &Header,
        _state: &mut dyn StateDb,
        _body: &Body,
    ) {
        // Clique pays no block rewards; state is left untouched
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
        chain: Arc<dyn ChainHeaderReader>,
        block: Block,
        results: mpsc::UnboundedSender<Block>,
        stop: watch::Receiver<bool>,
    ) -> Result<(), EngineError> {
        let header = &block.header;
        let number = header.number;
        if number == 0 {
            return Err(CliqueError::GenesisNotSealable.into());
        }
        // Zero-period chains only seal blocks that carry transactions
        if self.config.period == 0 && block.body.transactions.is_empty() {
            return Err(CliqueError::AwaitingTransactions.into());
        }
        let Some((signer, sign_fn)) = self.signer.read().clone() else {
            return Err(CliqueError::NotAuthorized {
                signer: Address::ZERO,
            }
            .into());
        };
        let snap = self.snapshot(chain.as_ref(), number - 1, header.parent_hash, None)?;
        if !snap.is_authorized(&signer) {
            return Err(CliqueError::NotAuthorized { signer }.into());
        }
        // If we're amongst the recent sealers, wait for the next block
        let window = recency_window(snap.signer_count());
        for (&sealed_at, &recent) in &snap.recent_sealers {
            if recent == signer && sealed_at > number.saturating_sub(window) {
                return Err(CliqueError::SignedTooRecently {
                    signer,
                    last_block: sealed_at,
                }
                .into());
            }
        }

        // The protocol permits us to sign; wait until the block's slot, with
        // an extra wiggle for out-of-turn sealers
        let mut delay = Duration::from_secs(header.time.saturating_sub(unix_now()));
        if header.difficulty == DIFF_NO_TURN {
            let wiggle = WIGGLE_TIME_MILLIS * recency_window(snap.signer_count());
            delay += Duration::from_millis(rand::thread_rng().gen_range(0..=wiggle));
        }

        let seal_hash = self.seal_hash_of(header);
        let signature = sign_fn(signer, &seal_hash)?;

        let mut sealed = block;
        let mut extra = sealed.header.extra.to_vec();
        if extra.len() < EXTRA_SEAL {
            return Err(CliqueError::TruncatedExtra { len: extra.len() }.into());
        }
        let seal_start = extra.len() - EXTRA_SEAL;
        extra[seal_start..].copy_from_slice(&signature);
        sealed.header.extra = extra.into();

        debug!(
            target: "consensus::clique",
            block = number,
            ?delay,
            "waiting for slot to sign and propagate"
        );

        thread::spawn(move || {
            let deadline = Instant::now() + delay;
            loop {
                if *stop.borrow() {
                    trace!(target: "consensus::clique", block = number, "sealing aborted");
                    return;
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                thread::sleep(STOP_POLL.min(remaining));
            }
            if *stop.borrow() {
                return;
            }
            if results.send(sealed).is_err() {
                warn!(target: "consensus::clique", block = number, "sealing result channel closed");
            }
        });
        Ok(())
    }

    fn seal_hash(&self, header: &Header) -> B256 {
        self.seal_hash_of(header)
    }

    fn calc_difficulty(&self, chain: &dyn ChainHeaderReader, _time: u64, parent: &Header) -> u64 {
        let signer = self.signer().unwrap_or(Address::ZERO);
        match self.snapshot(chain, parent.number, parent.hash, None) {
            Ok(snap) => snap.calc_difficulty(parent.number + 1, signer),
            Err(err) => {
                debug!(
                    target: "consensus::clique",
                    block = parent.number + 1,
                    %err,
                    "difficulty requested without reachable snapshot"
                );
                DIFF_NO_TURN
            }
        }
    }

    fn close(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chainspec::ChainConfig, consensus::clique::MemorySnapshotDatabase};
    use alloy_primitives::{Bytes, U256};
    use secp256k1::SecretKey;

    fn test_config() -> CliqueConfig {
        CliqueConfig {
            period: 15,
            epoch: 30000,
        }
    }

    fn checkpoint_extra(signers: &[Address]) -> Bytes {
        let mut extra = vec![0u8; EXTRA_VANITY];
        for signer in signers {
            extra.extend_from_slice(signer.as_slice());
        }
        extra.extend_from_slice(&[0u8; EXTRA_SEAL]);
        extra.into()
    }

    /// Chain reader backed by a number-indexed header list.
    struct TestChain {
        config: ChainConfig,
        headers: Vec<Header>,
    }

    impl TestChain {
        fn new(headers: Vec<Header>) -> Self {
            Self {
                config: ChainConfig {
                    chain_id: 1337,
                    terminal_total_difficulty: Some(U256::ZERO),
                    clique: Some(test_config()),
                    ..Default::default()
                },
                headers,
            }
        }

        fn with_genesis_signers(signers: &[Address]) -> Self {
            Self::new(vec![Header {
                number: 0,
                hash: B256::repeat_byte(0xfe),
                extra: checkpoint_extra(signers),
                ..Default::default()
            }])
        }
    }

    impl ChainHeaderReader for TestChain {
        fn config(&self) -> &ChainConfig {
            &self.config
        }

        fn current_header(&self) -> Option<Header> {
            self.headers.last().cloned()
        }

        fn get_header(&self, _hash: B256, number: u64) -> Option<Header> {
            self.get_header_by_number(number)
        }

        fn get_header_by_number(&self, number: u64) -> Option<Header> {
            self.headers.iter().find(|h| h.number == number).cloned()
        }

        fn get_header_by_hash(&self, hash: B256) -> Option<Header> {
            self.headers.iter().find(|h| h.hash == hash).cloned()
        }
    }

    fn engine() -> Arc<Clique<MemorySnapshotDatabase>> {
        Arc::new(Clique::new(test_config(), MemorySnapshotDatabase::new_arc()))
    }

    /// Minimal header passing every shape check at a non-checkpoint height.
    fn plain_header(number: u64) -> Header {
        Header {
            number,
            hash: B256::repeat_byte(number as u8),
            parent_hash: B256::repeat_byte(number.saturating_sub(1) as u8),
            nonce: NONCE_DROP_VOTE,
            extra: Bytes::from(vec![0u8; EXTRA_VANITY + EXTRA_SEAL]),
            difficulty: DIFF_NO_TURN,
            gas_limit: 8_000_000,
            time: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_clique_creation() {
        let engine = engine();
        assert_eq!(engine.config().period, 15);
        assert_eq!(engine.config().epoch, 30000);
        assert!(engine.signer().is_none());
        assert_eq!(engine.kind(), "Clique");
    }

    #[test]
    fn test_epoch_zero_falls_back_to_default() {
        let engine = Clique::new(
            CliqueConfig {
                period: 15,
                epoch: 0,
            },
            MemorySnapshotDatabase::new_arc(),
        );
        assert_eq!(engine.config().epoch, DEFAULT_EPOCH);
    }

    #[test]
    fn test_authorize() {
        let engine = engine();
        let signer = Address::repeat_byte(0x01);
        engine.authorize(signer, Arc::new(|_, _| Ok([0u8; 65])));
        assert_eq!(engine.signer(), Some(signer));
    }

    #[test]
    fn test_proposals() {
        let engine = engine();
        let addr = Address::repeat_byte(0x01);

        engine.propose(addr, true);
        assert_eq!(engine.proposals.read().get(&addr), Some(&true));

        engine.discard(addr);
        assert!(engine.proposals.read().get(&addr).is_none());
    }

    #[test]
    fn test_verify_header_rejects_future_block() {
        let engine = engine();
        let chain = TestChain::new(vec![]);
        let mut header = plain_header(1);
        header.time = unix_now() + 3600;
        assert!(matches!(
            engine.verify_header_inner(&chain, &header, None),
            Err(CliqueError::HeaderFromFuture { .. })
        ));
    }

    #[test]
    fn test_verify_header_rejects_bad_vote_nonce() {
        let engine = engine();
        let chain = TestChain::new(vec![]);
        let mut header = plain_header(1);
        header.nonce = [0x11; 8];
        assert_eq!(
            engine.verify_header_inner(&chain, &header, None),
            Err(CliqueError::InvalidVoteNonce { nonce: [0x11; 8] })
        );
    }

    #[test]
    fn test_verify_header_rejects_truncated_extra() {
        let engine = engine();
        let chain = TestChain::new(vec![]);

        // Too short for the vanity prefix alone, and too short for the
        // vanity + seal framing: both are the same defect
        for len in [10, EXTRA_VANITY + 10] {
            let mut header = plain_header(1);
            header.extra = Bytes::from(vec![0u8; len]);
            assert_eq!(
                engine.verify_header_inner(&chain, &header, None),
                Err(CliqueError::TruncatedExtra { len })
            );
        }
    }

    #[test]
    fn test_verify_header_rejects_payload_outside_checkpoint() {
        let engine = engine();
        let chain = TestChain::new(vec![]);
        let mut header = plain_header(1);
        header.extra = checkpoint_extra(&[Address::repeat_byte(0x01)]);
        assert_eq!(
            engine.verify_header_inner(&chain, &header, None),
            Err(CliqueError::UnexpectedSignerPayload { payload_len: 20 })
        );
    }

    #[test]
    fn test_verify_header_rejects_checkpoint_beneficiary() {
        let engine = engine();
        let chain = TestChain::new(vec![]);
        // number 30000 is epoch-aligned
        let mut header = plain_header(30000);
        header.extra = checkpoint_extra(&[Address::repeat_byte(0x01)]);
        header.coinbase = Address::repeat_byte(0x0a);
        assert_eq!(
            engine.verify_header_inner(&chain, &header, None),
            Err(CliqueError::CheckpointBeneficiary {
                beneficiary: Address::repeat_byte(0x0a)
            })
        );
    }

    #[test]
    fn test_verify_header_rejects_nonzero_mix_digest() {
        let engine = engine();
        let chain = TestChain::new(vec![]);
        let mut header = plain_header(1);
        header.mix_digest = B256::repeat_byte(0x01);
        assert_eq!(
            engine.verify_header_inner(&chain, &header, None),
            Err(CliqueError::DirtyMixDigest {
                digest: B256::repeat_byte(0x01)
            })
        );
    }

    #[test]
    fn test_verify_header_rejects_bad_difficulty() {
        let engine = engine();
        let chain = TestChain::new(vec![]);
        let mut header = plain_header(1);
        header.difficulty = 7;
        assert_eq!(
            engine.verify_header_inner(&chain, &header, None),
            Err(CliqueError::DifficultyOutOfRange {
                number: 1,
                difficulty: 7
            })
        );
    }

    #[test]
    fn test_verify_header_rejects_gas_misuse() {
        let engine = engine();
        let chain = TestChain::new(vec![]);

        let mut header = plain_header(1);
        header.gas_used = header.gas_limit + 1;
        assert!(matches!(
            engine.verify_header_inner(&chain, &header, None),
            Err(CliqueError::GasOveruse { .. })
        ));

        let mut header = plain_header(1);
        header.gas_limit = MAX_GAS_LIMIT + 1;
        header.gas_used = 0;
        assert!(matches!(
            engine.verify_header_inner(&chain, &header, None),
            Err(CliqueError::GasLimitTooHigh { .. })
        ));
    }

    #[test]
    fn test_verify_header_missing_parent() {
        let engine = engine();
        let chain = TestChain::new(vec![]);
        let header = plain_header(1);
        assert_eq!(
            engine.verify_header_inner(&chain, &header, None),
            Err(CliqueError::MissingParent { number: 1 })
        );
    }

    #[test]
    fn test_verify_uncles_forbidden() {
        let engine = engine();
        let chain = TestChain::new(vec![]);

        let clean = Block::new(plain_header(1), Body::default());
        assert!(engine.verify_uncles(&chain, &clean).is_ok());

        let mut body = Body::default();
        body.uncles.push(plain_header(1));
        let bad = Block::new(plain_header(2), body);
        assert_eq!(
            engine.verify_uncles(&chain, &bad),
            Err(CliqueError::UnclesForbidden.into())
        );
    }

    #[test]
    fn test_ecrecover_roundtrip() {
        let engine = engine();
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let expected = pubkey_to_address(&secret.public_key(&secp));

        let mut header = plain_header(1);
        let seal_hash = engine.seal_hash_of(&header);
        let message = secp256k1::Message::from_digest_slice(seal_hash.as_slice()).unwrap();
        let signature = secp.sign_ecdsa_recoverable(&message, &secret);
        let (recovery_id, compact) = signature.serialize_compact();

        let mut extra = header.extra.to_vec();
        let seal_start = extra.len() - EXTRA_SEAL;
        extra[seal_start..seal_start + 64].copy_from_slice(&compact);
        extra[seal_start + 64] = i32::from(recovery_id) as u8;
        header.extra = extra.into();

        assert_eq!(engine.ecrecover(&header).unwrap(), expected);
        // Second call hits the sealer cache
        assert_eq!(engine.ecrecover(&header).unwrap(), expected);
    }

    #[test]
    fn test_split_seal_accepts_legacy_recovery_id() {
        let mut seal = [0u8; 65];
        seal[64] = 28; // legacy form of recovery id 1
        let (recovery_id, compact) = split_seal(&seal).unwrap();
        assert_eq!(i32::from(recovery_id), 1);
        assert_eq!(compact.len(), 64);

        assert!(matches!(
            split_seal(&seal[..40]),
            Err(CliqueError::TruncatedExtra { len: 40 })
        ));
    }

    #[test]
    fn test_prepare_keeps_seeded_signer_payload() {
        let engine = engine();
        let signers = vec![
            Address::repeat_byte(0x01),
            Address::repeat_byte(0x02),
            Address::repeat_byte(0x03),
        ];
        let mut chain = TestChain::with_genesis_signers(&signers);
        chain.headers.push(Header {
            number: 99,
            hash: B256::repeat_byte(0x63),
            time: 500,
            ..Default::default()
        });

        // Transition-style seeded header: payload present, not epoch-aligned
        let mut header = Header {
            number: 100,
            parent_hash: B256::repeat_byte(0x63),
            extra: checkpoint_extra(&signers),
            ..Default::default()
        };
        let seeded_extra = header.extra.clone();

        engine.prepare(&chain, &mut header).unwrap();

        assert_eq!(header.extra, seeded_extra);
        assert_eq!(header.checkpoint_signers().unwrap(), signers);
        assert_eq!(header.coinbase, Address::ZERO);
        assert_eq!(header.nonce, NONCE_DROP_VOTE);
        assert_eq!(header.mix_digest, B256::ZERO);
        assert_eq!(header.difficulty, DIFF_IN_TURN);
        assert!(header.time >= 515);
    }

    #[test]
    fn test_prepare_plain_header_from_snapshot() {
        let engine = engine();
        let signer = Address::repeat_byte(0x01);
        let chain = TestChain::with_genesis_signers(&[signer]);

        let mut header = Header {
            number: 1,
            parent_hash: B256::repeat_byte(0xfe),
            ..Default::default()
        };
        engine.prepare(&chain, &mut header).unwrap();

        // Non-checkpoint: vanity + seal only, no signer payload
        assert_eq!(header.extra.len(), EXTRA_VANITY + EXTRA_SEAL);
        assert_eq!(header.signer_payload_len(), 0);
        assert_eq!(header.nonce, NONCE_DROP_VOTE);
        assert!(header.time >= 15);
    }

    #[test]
    fn test_prepare_rejects_genesis() {
        let engine = engine();
        let chain = TestChain::new(vec![]);
        let mut header = Header::default();
        assert_eq!(
            engine.prepare(&chain, &mut header),
            Err(CliqueError::GenesisNotSealable.into())
        );
    }

    #[test]
    fn test_seal_requires_authorization() {
        let engine = engine();
        let chain: Arc<dyn ChainHeaderReader> = Arc::new(TestChain::with_genesis_signers(&[
            Address::repeat_byte(0x01),
        ]));
        let block = Block::new(plain_header(1), Body::default());
        let (results_tx, _results_rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = watch::channel(false);

        assert_eq!(
            engine.seal(chain, block, results_tx, stop_rx),
            Err(CliqueError::NotAuthorized {
                signer: Address::ZERO
            }
            .into())
        );
    }

    #[test]
    fn test_seal_delivers_signed_block() {
        let engine = engine();
        let signer = Address::repeat_byte(0x01);
        engine.authorize(signer, Arc::new(|_, _| Ok([0x07; 65])));
        let chain: Arc<dyn ChainHeaderReader> =
            Arc::new(TestChain::with_genesis_signers(&[signer]));

        let mut header = plain_header(1);
        header.time = 1; // long past, no slot delay
        header.difficulty = DIFF_IN_TURN; // no out-of-turn wiggle
        let block = Block::new(header, Body::default());

        let (results_tx, mut results_rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = watch::channel(false);
        engine.clone().seal(chain, block, results_tx, stop_rx).unwrap();

        let sealed = results_rx.blocking_recv().expect("sealed block");
        let seal = sealed.header.signature().unwrap();
        assert!(seal.iter().all(|&b| b == 0x07));
    }

    #[test]
    fn test_seal_honors_stop_channel() {
        let engine = engine();
        let signer = Address::repeat_byte(0x01);
        engine.authorize(signer, Arc::new(|_, _| Ok([0x07; 65])));
        let chain: Arc<dyn ChainHeaderReader> =
            Arc::new(TestChain::with_genesis_signers(&[signer]));

        let mut header = plain_header(1);
        header.time = unix_now() + 3600; // far-future slot
        header.difficulty = DIFF_IN_TURN;
        let block = Block::new(header, Body::default());

        let (results_tx, mut results_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        stop_tx.send(true).unwrap();
        engine.clone().seal(chain, block, results_tx, stop_rx).unwrap();

        // The worker observed the stop signal and dropped the channel
        assert!(results_rx.blocking_recv().is_none());
    }

    #[test]
    fn test_seal_paused_on_empty_zero_period_block() {
        let engine = Arc::new(Clique::new(
            CliqueConfig {
                period: 0,
                epoch: 30000,
            },
            MemorySnapshotDatabase::new_arc(),
        ));
        let chain: Arc<dyn ChainHeaderReader> = Arc::new(TestChain::with_genesis_signers(&[
            Address::repeat_byte(0x01),
        ]));
        let block = Block::new(plain_header(1), Body::default());
        let (results_tx, _results_rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = watch::channel(false);

        assert_eq!(
            engine.seal(chain, block, results_tx, stop_rx),
            Err(CliqueError::AwaitingTransactions.into())
        );
    }

    #[test]
    fn test_calc_difficulty_from_snapshot() {
        let engine = engine();
        let signer = Address::repeat_byte(0x01);
        let other = Address::repeat_byte(0x02);
        engine.authorize(signer, Arc::new(|_, _| Ok([0u8; 65])));
        let chain = TestChain::with_genesis_signers(&[signer, other]);

        let parent = chain.get_header_by_number(0).unwrap();
        // Two signers: block 1 belongs to the second one, we are out of turn
        assert_eq!(engine.calc_difficulty(&chain, 0, &parent), DIFF_NO_TURN);
    }

    #[test]
    fn test_snapshot_seeds_from_genesis_and_caches() {
        let engine = engine();
        let signer = Address::repeat_byte(0x01);
        let chain = TestChain::with_genesis_signers(&[signer]);

        let snap = engine
            .snapshot(&chain, 0, B256::repeat_byte(0xfe), None)
            .unwrap();
        assert_eq!(snap.ordered_signers(), vec![signer]);

        // The seeded genesis snapshot was persisted and cached
        assert!(engine.db.contains(B256::repeat_byte(0xfe)).unwrap());
        assert!(engine
            .snapshots
            .write()
            .get(&B256::repeat_byte(0xfe))
            .is_some());
    }

    #[test]
    fn test_verify_headers_batch_results_in_order() {
        let engine = engine();
        let chain: Arc<dyn ChainHeaderReader> = Arc::new(TestChain::new(vec![]));

        // Both headers fail fast (future block / bad nonce); order must hold
        let mut first = plain_header(1);
        first.time = unix_now() + 3600;
        let mut second = plain_header(2);
        second.nonce = [0x11; 8];

        let results = engine.verify_headers(chain, vec![first, second]).collect();
        assert_eq!(results.len(), 2);
        assert!(matches!(
            results[0],
            Err(EngineError::Clique(CliqueError::HeaderFromFuture { .. }))
        ));
        assert_eq!(
            results[1],
            Err(EngineError::Clique(CliqueError::InvalidVoteNonce {
                nonce: [0x11; 8]
            }))
        );
    }
}
