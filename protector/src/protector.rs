use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use kvpool::Pool;
use kvstore::{signing_roots_differ, SlashingKind, Store};
use log::debug;
use thiserror::Error;
use types::{
    containers::{AttestationData, Checkpoint},
    primitives::{PublicKeyBytes, Slot, H256},
};

use crate::check::{Check, History, SlashingViolation};

#[derive(Debug, Error)]
pub enum Error {
    #[error("attestation source and target are required")]
    MissingCheckpoints,
}

/// The slashing-protection capability set. Implementations answer whether
/// signing a message is safe according to the history they have recorded,
/// and record the message when it is.
#[async_trait]
pub trait Protector: Send + Sync {
    async fn check_attestation(
        &self,
        network: &str,
        pub_key: PublicKeyBytes,
        signing_root: H256,
        data: &AttestationData,
    ) -> Result<Check>;

    async fn check_proposal(
        &self,
        network: &str,
        pub_key: PublicKeyBytes,
        signing_root: H256,
        slot: Slot,
    ) -> Result<Check>;

    async fn history(&self, network: &str, pub_key: PublicKeyBytes) -> Result<History>;
}

/// Optional capability exposing the connection pool for observability.
pub trait PoolIntrospection: Send + Sync {
    fn acquired_conns(&self) -> usize;
}

/// A [`Protector`] backed by per-validator embedded key-value stores.
pub struct KvProtector {
    pool: Pool,
}

impl KvProtector {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            pool: Pool::new(directory),
        }
    }

    pub fn close(&self) {
        self.pool.close();
    }
}

#[async_trait]
impl Protector for KvProtector {
    async fn check_attestation(
        &self,
        network: &str,
        pub_key: PublicKeyBytes,
        signing_root: H256,
        data: &AttestationData,
    ) -> Result<Check> {
        let source = data.source.ok_or(Error::MissingCheckpoints)?;
        let target = data.target.ok_or(Error::MissingCheckpoints)?;

        let mut conn = self.pool.acquire(network, pub_key).await?;

        let outcome = match conn.store() {
            Ok(store) => check_attestation_with_store(store, signing_root, source, target).await,
            Err(error) => Err(error),
        };

        combine_with_release(outcome, conn.release().await)
    }

    async fn check_proposal(
        &self,
        network: &str,
        pub_key: PublicKeyBytes,
        signing_root: H256,
        slot: Slot,
    ) -> Result<Check> {
        let mut conn = self.pool.acquire(network, pub_key).await?;

        let outcome = match conn.store() {
            Ok(store) => check_proposal_with_store(store, signing_root, slot).await,
            Err(error) => Err(error),
        };

        combine_with_release(outcome, conn.release().await)
    }

    async fn history(&self, network: &str, pub_key: PublicKeyBytes) -> Result<History> {
        let mut conn = self.pool.acquire(network, pub_key).await?;

        let outcome = conn.store().and_then(|store| {
            Ok(History {
                proposals: store.proposal_history()?,
                attestations: store.attestation_history()?,
            })
        });

        combine_with_release(outcome, conn.release().await)
    }
}

impl PoolIntrospection for KvProtector {
    fn acquired_conns(&self) -> usize {
        self.pool.acquired_count()
    }
}

/// The EIP-3076 attestation rules plus the double-vote and surround checks
/// against the recorded log. The order of the checks and the `<` versus `≤`
/// comparisons are part of the contract. History is written only after every
/// check has passed.
async fn check_attestation_with_store(
    store: &Store,
    signing_root: H256,
    source: Checkpoint,
    target: Checkpoint,
) -> Result<Check> {
    if let Some(lowest) = store.lowest_signed_source_epoch()? {
        if source.epoch < lowest {
            return Ok(Check::slashable(
                SlashingViolation::SourceEpochBelowMinimum {
                    source_epoch: source.epoch,
                    lowest,
                },
            ));
        }
    }

    let existing = store.signing_root_at_target_epoch(target.epoch)?;
    let roots_differ = signing_roots_differ(existing, signing_root);

    if let Some(lowest) = store.lowest_signed_target_epoch()? {
        if roots_differ && target.epoch <= lowest {
            return Ok(Check::slashable(
                SlashingViolation::TargetEpochAtOrBelowMinimum {
                    target_epoch: target.epoch,
                    lowest,
                },
            ));
        }
    }

    let violation =
        match store.check_slashable_attestation(signing_root, source.epoch, target.epoch)? {
            SlashingKind::None => None,
            SlashingKind::DoubleVote => Some(SlashingViolation::DoubleVote {
                target_epoch: target.epoch,
            }),
            SlashingKind::SurroundingVote => Some(SlashingViolation::SurroundingVote),
            SlashingKind::SurroundedVote => Some(SlashingViolation::SurroundedVote),
        };

    if let Some(violation) = violation {
        debug!("rejecting slashable attestation: {violation}");
        return Ok(Check::slashable(violation));
    }

    store
        .save_attestation(signing_root, source.epoch, target.epoch)
        .await?;

    Ok(Check::not_slashable())
}

async fn check_proposal_with_store(store: &Store, signing_root: H256, slot: Slot) -> Result<Check> {
    let previous = store.proposal_root_at_slot(slot)?;
    let exists_at_slot = previous.is_some();
    let roots_differ = signing_roots_differ(previous, signing_root);
    let lowest = store.lowest_signed_proposal_slot()?;

    if exists_at_slot && roots_differ {
        return Ok(Check::slashable(SlashingViolation::DoubleProposal { slot }));
    }

    if let Some(lowest) = lowest {
        if roots_differ && lowest >= slot {
            return Ok(Check::slashable(SlashingViolation::SlotAtOrBelowMinimum {
                slot,
                lowest,
            }));
        }
    }

    store.save_proposal(slot, signing_root).await?;

    Ok(Check::not_slashable())
}

/// Release errors are never silently dropped; they are combined with the
/// operation's own outcome.
fn combine_with_release<T>(outcome: Result<T>, release_result: Result<()>) -> Result<T> {
    match (outcome, release_result) {
        (outcome, Ok(())) => outcome,
        (Ok(_), Err(release_error)) => Err(release_error.context("failed to release connection")),
        (Err(error), Err(release_error)) => {
            Err(error.context(format!("also failed to release connection: {release_error:?}")))
        }
    }
}
