//! Authority snapshot: the signer set and pending votes at one block.

use super::{
    recency_window, CliqueError, DEFAULT_EPOCH, DIFF_IN_TURN, DIFF_NO_TURN, NONCE_AUTH_VOTE,
    NONCE_DROP_VOTE,
};
use crate::primitives::Header;
use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Clique configuration parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliqueConfig {
    /// Number of seconds between blocks to enforce.
    pub period: u64,
    /// Epoch length to reset votes and checkpoint.
    pub epoch: u64,
}

impl Default for CliqueConfig {
    fn default() -> Self {
        Self {
            period: 15,
            epoch: DEFAULT_EPOCH,
        }
    }
}

/// One pending authorization vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Authorized signer that cast this vote.
    pub signer: Address,
    /// Block number the vote was cast in.
    pub block: u64,
    /// Account whose authorization the vote wants to change.
    pub address: Address,
    /// Whether to authorize or drop the account.
    pub authorize: bool,
}

/// Running score of votes on one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tally {
    /// Whether the scored votes authorize or drop the account.
    pub authorize: bool,
    /// Number of votes in favour.
    pub votes: usize,
}

/// The authority state as of one block: who may seal, who sealed recently,
/// and which votes are still open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Consensus engine configuration.
    #[serde(skip)]
    pub config: CliqueConfig,

    /// Block number the snapshot describes.
    pub number: u64,

    /// Hash of that block.
    pub hash: B256,

    /// Authorized signers, ordered.
    pub signers: BTreeSet<Address>,

    /// Who sealed which recent block, for recency-window enforcement.
    pub recent_sealers: HashMap<u64, Address>,

    /// Open votes in the order they were cast.
    pub votes: Vec<Vote>,

    /// Per-account vote score.
    pub tally: HashMap<Address, Tally>,
}

impl Snapshot {
    /// Snapshot seeded from a checkpoint's signer list.
    ///
    /// Recent-sealer history starts empty, so this only fits checkpoint
    /// (genesis or transition) blocks.
    pub fn new(config: CliqueConfig, number: u64, hash: B256, signers: Vec<Address>) -> Self {
        Self {
            config,
            number,
            hash,
            signers: signers.into_iter().collect(),
            recent_sealers: HashMap::new(),
            votes: Vec::new(),
            tally: HashMap::new(),
        }
    }

    /// The authorized signers in ascending order.
    pub fn ordered_signers(&self) -> Vec<Address> {
        self.signers.iter().copied().collect()
    }

    /// Whether `address` may seal under this snapshot.
    pub fn is_authorized(&self, address: &Address) -> bool {
        self.signers.contains(address)
    }

    /// Size of the signer set.
    pub fn signer_count(&self) -> usize {
        self.signers.len()
    }

    /// Whether `signer` holds the sealing turn at height `number`.
    pub fn in_turn(&self, number: u64, signer: Address) -> bool {
        let signers = self.ordered_signers();
        if signers.is_empty() {
            return false;
        }
        let offset = signers.iter().position(|s| *s == signer).unwrap_or(0);
        (number % signers.len() as u64) == offset as u64
    }

    /// Difficulty `signer` should claim at height `number`.
    pub fn calc_difficulty(&self, number: u64, signer: Address) -> u64 {
        if self.in_turn(number, signer) {
            DIFF_IN_TURN
        } else {
            DIFF_NO_TURN
        }
    }

    /// Whether a vote on `address` can change anything: only non-signers can
    /// be authorized and only signers can be dropped.
    pub fn valid_vote(&self, address: &Address, authorize: bool) -> bool {
        self.signers.contains(address) != authorize
    }

    /// Score a vote. Returns false when the vote cannot change anything.
    pub fn cast(&mut self, address: Address, authorize: bool) -> bool {
        if !self.valid_vote(&address, authorize) {
            return false;
        }
        self.tally
            .entry(address)
            .or_insert(Tally {
                authorize,
                votes: 0,
            })
            .votes += 1;
        true
    }

    /// Withdraw one previously scored vote. Returns false when no matching
    /// vote was on the books.
    pub fn uncast(&mut self, address: Address, authorize: bool) -> bool {
        let Some(tally) = self.tally.get_mut(&address) else {
            return false;
        };
        if tally.authorize != authorize {
            return false;
        }
        if tally.votes > 1 {
            tally.votes -= 1;
        } else {
            self.tally.remove(&address);
        }
        true
    }

    /// Withdraw and forget every open vote `signer` cast on `target`, or all
    /// of the signer's votes when `target` is `None`.
    fn discard_votes(&mut self, signer: Address, target: Option<Address>) {
        let matches = |vote: &Vote| {
            vote.signer == signer && target.map_or(true, |address| vote.address == address)
        };

        let withdrawals: Vec<_> = self
            .votes
            .iter()
            .filter(|vote| matches(vote))
            .map(|vote| (vote.address, vote.authorize))
            .collect();
        for (address, authorize) in withdrawals {
            self.uncast(address, authorize);
        }
        self.votes.retain(|vote| !matches(vote));
    }

    /// Roll this snapshot forward across `headers`, which must directly
    /// extend it, and return the snapshot at the last header.
    ///
    /// `recover_sealer` resolves the account that sealed each header.
    pub fn apply<F>(&self, headers: &[Header], recover_sealer: F) -> Result<Snapshot, CliqueError>
    where
        F: Fn(&Header) -> Result<Address, CliqueError>,
    {
        let Some(last) = headers.last() else {
            return Ok(self.clone());
        };

        let mut snap = self.clone();
        let mut expected = self.number + 1;
        for header in headers {
            if header.number != expected {
                return Err(CliqueError::BrokenVoteChain {
                    expected,
                    got: header.number,
                });
            }
            expected += 1;

            let sealer = recover_sealer(header)?;
            snap.apply_header(header, sealer)?;
        }

        snap.number = last.number;
        snap.hash = last.hash;
        Ok(snap)
    }

    /// Account one sealed header: recency bookkeeping, the header's vote,
    /// and any authorization change the vote tips over.
    fn apply_header(&mut self, header: &Header, sealer: Address) -> Result<(), CliqueError> {
        let number = header.number;

        // Checkpoint blocks wipe all open votes
        if number % self.config.epoch == 0 {
            self.votes.clear();
            self.tally.clear();
        }

        // The oldest entry falls out of the recency window
        let window = recency_window(self.signers.len());
        if number >= window {
            self.recent_sealers.remove(&(number - window));
        }

        if !self.signers.contains(&sealer) {
            return Err(CliqueError::NotAuthorized { signer: sealer });
        }
        if let Some(&last_block) = self
            .recent_sealers
            .iter()
            .find_map(|(block, who)| (*who == sealer).then_some(block))
        {
            return Err(CliqueError::SignedTooRecently {
                signer: sealer,
                last_block,
            });
        }
        self.recent_sealers.insert(number, sealer);

        // A fresh vote supersedes the sealer's earlier vote on the target
        self.discard_votes(sealer, Some(header.coinbase));

        let authorize = match header.nonce {
            NONCE_AUTH_VOTE => true,
            NONCE_DROP_VOTE => false,
            nonce => return Err(CliqueError::InvalidVoteNonce { nonce }),
        };
        if self.cast(header.coinbase, authorize) {
            self.votes.push(Vote {
                signer: sealer,
                block: number,
                address: header.coinbase,
                authorize,
            });
        }

        self.settle_tally(number, header.coinbase);
        Ok(())
    }

    /// Apply the authorization change once a majority backs the vote on
    /// `target`, and clean every trace of the settled ballot.
    fn settle_tally(&mut self, number: u64, target: Address) {
        let Some(tally) = self.tally.get(&target).copied() else {
            return;
        };
        if tally.votes <= self.signers.len() / 2 {
            return;
        }

        if tally.authorize {
            self.signers.insert(target);
        } else {
            self.signers.remove(&target);

            // The recency window shrank with the signer set
            let window = recency_window(self.signers.len());
            if number >= window {
                self.recent_sealers.remove(&(number - window));
            }

            // A dropped signer's open votes no longer count
            self.discard_votes(target, None);
        }

        self.votes.retain(|vote| vote.address != target);
        self.tally.remove(&target);
    }
}
