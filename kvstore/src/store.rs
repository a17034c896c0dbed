use std::{path::Path, sync::Arc};

use anyhow::Result;
use bytesize::ByteSize;
use database::Database;
use futures::{
    channel::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    select_biased,
    stream::StreamExt as _,
};
use log::{debug, warn};
use thiserror::Error;
use tokio::task::JoinHandle;
use types::primitives::{Epoch, PublicKeyBytes, Slot, H256};

use crate::records::{signing_roots_differ, AttestationRecord, ProposalRecord, SlashingKind};

const STORE_DATABASE_NAME: &str = "slashing_history";
const STORE_MAX_SIZE: ByteSize = ByteSize::gib(1);

const ATTESTATION_KEY_PREFIX: &[u8] = b"attestation/";
const PROPOSAL_KEY_PREFIX: &[u8] = b"proposal/";
const LOWEST_SOURCE_EPOCH_KEY: &[u8] = b"lowest_source_epoch";
const LOWEST_TARGET_EPOCH_KEY: &[u8] = b"lowest_target_epoch";
const LOWEST_PROPOSAL_SLOT_KEY: &[u8] = b"lowest_proposal_slot";

const EPOCH_SIZE: usize = size_of::<Epoch>();
const SLOT_SIZE: usize = size_of::<Slot>();
const ATTESTATION_KEY_LENGTH: usize = ATTESTATION_KEY_PREFIX.len() + EPOCH_SIZE;
const PROPOSAL_KEY_LENGTH: usize = PROPOSAL_KEY_PREFIX.len() + SLOT_SIZE;

type AttestationKey = [u8; ATTESTATION_KEY_LENGTH];
type ProposalKey = [u8; PROPOSAL_KEY_LENGTH];

// Epochs and slots are big-endian in keys so that prefix iteration
// visits records in ascending order.

fn attestation_key(target_epoch: Epoch) -> AttestationKey {
    let mut key = [0; ATTESTATION_KEY_LENGTH];
    key[..ATTESTATION_KEY_PREFIX.len()].copy_from_slice(ATTESTATION_KEY_PREFIX);
    key[ATTESTATION_KEY_PREFIX.len()..].copy_from_slice(&target_epoch.to_be_bytes());
    key
}

fn proposal_key(slot: Slot) -> ProposalKey {
    let mut key = [0; PROPOSAL_KEY_LENGTH];
    key[..PROPOSAL_KEY_PREFIX.len()].copy_from_slice(PROPOSAL_KEY_PREFIX);
    key[PROPOSAL_KEY_PREFIX.len()..].copy_from_slice(&slot.to_be_bytes());
    key
}

/// Name of the history database file for one validator on one network.
#[must_use]
pub fn store_file_name(network: &str, pub_key: PublicKeyBytes) -> String {
    format!("kvstore-{network}-{pub_key:x}")
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("store write worker has stopped")]
    WorkerStopped,
}

enum WriteRequest {
    Attestation {
        record: AttestationRecord,
        reply: oneshot::Sender<Result<()>>,
    },
    Proposal {
        record: ProposalRecord,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// The signing history of a single validator on a single network.
///
/// Reads go directly to the database. Writes are serialised through a
/// background worker whose termination is tied to the lifetime signal given
/// at open time; a write is acknowledged only once its transaction has
/// committed. Firing the lifetime signal while writes are still queued
/// strands their acknowledgements, so handles must close the store before
/// cancelling the signal.
pub struct Store {
    database: Arc<Database>,
    write_tx: UnboundedSender<WriteRequest>,
    worker: JoinHandle<()>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>, lifetime_rx: oneshot::Receiver<()>) -> Result<Self> {
        let database = Database::persistent(STORE_DATABASE_NAME, path, STORE_MAX_SIZE)?;
        Ok(Self::new(database, lifetime_rx))
    }

    #[must_use]
    pub fn in_memory(lifetime_rx: oneshot::Receiver<()>) -> Self {
        Self::new(Database::in_memory(), lifetime_rx)
    }

    fn new(database: Database, lifetime_rx: oneshot::Receiver<()>) -> Self {
        let database = Arc::new(database);
        let (write_tx, write_rx) = mpsc::unbounded();
        let worker = tokio::spawn(process_writes(database.clone(), write_rx, lifetime_rx));

        Self {
            database,
            write_tx,
            worker,
        }
    }

    /// Drains queued writes and stops the write worker.
    /// Must be called before the lifetime signal is fired.
    pub async fn close(self) -> Result<()> {
        let Self {
            database,
            write_tx,
            worker,
        } = self;

        drop(write_tx);
        worker.await?;
        drop(database);

        Ok(())
    }

    pub fn lowest_signed_source_epoch(&self) -> Result<Option<Epoch>> {
        self.read_watermark(LOWEST_SOURCE_EPOCH_KEY)
    }

    pub fn lowest_signed_target_epoch(&self) -> Result<Option<Epoch>> {
        self.read_watermark(LOWEST_TARGET_EPOCH_KEY)
    }

    pub fn lowest_signed_proposal_slot(&self) -> Result<Option<Slot>> {
        self.read_watermark(LOWEST_PROPOSAL_SLOT_KEY)
    }

    pub fn signing_root_at_target_epoch(&self, target_epoch: Epoch) -> Result<Option<H256>> {
        self.database
            .get(attestation_key(target_epoch))?
            .map(|bytes| {
                let record = bincode::deserialize::<AttestationRecord>(&bytes)?;
                Ok(record.signing_root)
            })
            .transpose()
    }

    pub fn proposal_root_at_slot(&self, slot: Slot) -> Result<Option<H256>> {
        Ok(self
            .database
            .get(proposal_key(slot))?
            .map(|bytes| H256::from_slice(&bytes)))
    }

    pub async fn save_attestation(
        &self,
        signing_root: H256,
        source_epoch: Epoch,
        target_epoch: Epoch,
    ) -> Result<()> {
        let record = AttestationRecord {
            source_epoch,
            target_epoch,
            signing_root,
        };

        self.submit_write(|reply| WriteRequest::Attestation { record, reply })
            .await
    }

    pub async fn save_proposal(&self, slot: Slot, signing_root: H256) -> Result<()> {
        let record = ProposalRecord { slot, signing_root };

        self.submit_write(|reply| WriteRequest::Proposal { record, reply })
            .await
    }

    /// Checks the attestation against every recorded one.
    /// Does not mutate history.
    pub fn check_slashable_attestation(
        &self,
        signing_root: H256,
        source_epoch: Epoch,
        target_epoch: Epoch,
    ) -> Result<SlashingKind> {
        if let Some(existing) = self.signing_root_at_target_epoch(target_epoch)? {
            if signing_roots_differ(Some(existing), signing_root) {
                return Ok(SlashingKind::DoubleVote);
            }
        }

        for record in self.attestation_history()? {
            if source_epoch < record.source_epoch && target_epoch > record.target_epoch {
                return Ok(SlashingKind::SurroundingVote);
            }

            if source_epoch > record.source_epoch && target_epoch < record.target_epoch {
                return Ok(SlashingKind::SurroundedVote);
            }
        }

        Ok(SlashingKind::None)
    }

    pub fn attestation_history(&self) -> Result<Vec<AttestationRecord>> {
        let mut records = vec![];

        for result in self.database.iterator_ascending(ATTESTATION_KEY_PREFIX..)? {
            let (key, value) = result?;

            if !key.starts_with(ATTESTATION_KEY_PREFIX) {
                break;
            }

            records.push(bincode::deserialize(&value)?);
        }

        Ok(records)
    }

    pub fn proposal_history(&self) -> Result<Vec<ProposalRecord>> {
        let mut records = vec![];

        for result in self.database.iterator_ascending(PROPOSAL_KEY_PREFIX..)? {
            let (key, value) = result?;

            if !key.starts_with(PROPOSAL_KEY_PREFIX) {
                break;
            }

            let (_prefix, slot_bytes) = key.split_at(PROPOSAL_KEY_PREFIX.len());

            records.push(ProposalRecord {
                slot: Slot::from_be_bytes(slot_bytes.try_into()?),
                signing_root: H256::from_slice(&value),
            });
        }

        Ok(records)
    }

    fn read_watermark(&self, key: &[u8]) -> Result<Option<u64>> {
        self.database
            .get(key)?
            .map(|bytes| {
                let bytes = bytes.as_slice().try_into()?;
                Ok(u64::from_le_bytes(bytes))
            })
            .transpose()
    }

    async fn submit_write(
        &self,
        build_request: impl FnOnce(oneshot::Sender<Result<()>>) -> WriteRequest,
    ) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.write_tx
            .unbounded_send(build_request(reply_tx))
            .map_err(|_send_error| Error::WorkerStopped)?;

        reply_rx.await.map_err(|_canceled| Error::WorkerStopped)?
    }
}

async fn process_writes(
    database: Arc<Database>,
    mut write_rx: UnboundedReceiver<WriteRequest>,
    mut lifetime_rx: oneshot::Receiver<()>,
) {
    loop {
        select_biased! {
            request = write_rx.next() => match request {
                Some(request) => apply_write(&database, request),
                None => break,
            },
            _ = &mut lifetime_rx => {
                warn!("store lifetime signal fired before the store was closed");
                break;
            }
        }
    }
}

fn apply_write(database: &Database, request: WriteRequest) {
    let (result, reply) = match request {
        WriteRequest::Attestation { record, reply } => (save_attestation(database, record), reply),
        WriteRequest::Proposal { record, reply } => (save_proposal(database, record), reply),
    };

    // The requester may have gone away. The write is already durable.
    if reply.send(result).is_err() {
        debug!("store write acknowledgement dropped");
    }
}

fn save_attestation(database: &Database, record: AttestationRecord) -> Result<()> {
    let mut pairs = vec![(
        attestation_key(record.target_epoch).to_vec(),
        bincode::serialize(&record)?,
    )];

    if watermark_descends(database, LOWEST_SOURCE_EPOCH_KEY, record.source_epoch)? {
        pairs.push((
            LOWEST_SOURCE_EPOCH_KEY.to_vec(),
            record.source_epoch.to_le_bytes().to_vec(),
        ));
    }

    if watermark_descends(database, LOWEST_TARGET_EPOCH_KEY, record.target_epoch)? {
        pairs.push((
            LOWEST_TARGET_EPOCH_KEY.to_vec(),
            record.target_epoch.to_le_bytes().to_vec(),
        ));
    }

    database.put_batch(pairs)
}

fn save_proposal(database: &Database, record: ProposalRecord) -> Result<()> {
    let mut pairs = vec![(
        proposal_key(record.slot).to_vec(),
        record.signing_root.as_bytes().to_vec(),
    )];

    if watermark_descends(database, LOWEST_PROPOSAL_SLOT_KEY, record.slot)? {
        pairs.push((
            LOWEST_PROPOSAL_SLOT_KEY.to_vec(),
            record.slot.to_le_bytes().to_vec(),
        ));
    }

    database.put_batch(pairs)
}

// Watermarks only ever record historical minima.
fn watermark_descends(database: &Database, key: &[u8], candidate: u64) -> Result<bool> {
    let current = database
        .get(key)?
        .map(|bytes| {
            let bytes = bytes.as_slice().try_into()?;
            Ok::<_, anyhow::Error>(u64::from_le_bytes(bytes))
        })
        .transpose()?;

    Ok(current.is_none_or(|current| candidate < current))
}

#[cfg(test)]
mod tests {
    use futures::channel::oneshot::{self, Sender};
    use hex_literal::hex;
    use tempfile::TempDir;

    use super::*;

    const SIGNING_ROOT: H256 = H256(hex!(
        "587d6a4f59a58fe24f406e0502413e77fe1babddee641fda30034ed37ecc884d"
    ));

    fn build_store() -> (Store, Sender<()>) {
        let (lifetime_tx, lifetime_rx) = oneshot::channel();
        (Store::in_memory(lifetime_rx), lifetime_tx)
    }

    #[tokio::test]
    async fn watermarks_start_absent_and_only_descend() -> Result<()> {
        let (store, _lifetime_tx) = build_store();

        assert_eq!(store.lowest_signed_source_epoch()?, None);
        assert_eq!(store.lowest_signed_target_epoch()?, None);

        store.save_attestation(SIGNING_ROOT, 5, 10).await?;

        assert_eq!(store.lowest_signed_source_epoch()?, Some(5));
        assert_eq!(store.lowest_signed_target_epoch()?, Some(10));

        store.save_attestation(SIGNING_ROOT, 3, 8).await?;

        assert_eq!(store.lowest_signed_source_epoch()?, Some(3));
        assert_eq!(store.lowest_signed_target_epoch()?, Some(8));

        store.save_attestation(SIGNING_ROOT, 7, 12).await?;

        assert_eq!(store.lowest_signed_source_epoch()?, Some(3));
        assert_eq!(store.lowest_signed_target_epoch()?, Some(8));

        Ok(())
    }

    #[tokio::test]
    async fn signing_root_is_indexed_by_target_epoch() -> Result<()> {
        let (store, _lifetime_tx) = build_store();

        assert_eq!(store.signing_root_at_target_epoch(10)?, None);

        store.save_attestation(SIGNING_ROOT, 5, 10).await?;

        assert_eq!(store.signing_root_at_target_epoch(10)?, Some(SIGNING_ROOT));
        assert_eq!(store.signing_root_at_target_epoch(11)?, None);

        Ok(())
    }

    #[tokio::test]
    async fn proposals_are_indexed_by_slot() -> Result<()> {
        let (store, _lifetime_tx) = build_store();

        assert_eq!(store.proposal_root_at_slot(32)?, None);
        assert_eq!(store.lowest_signed_proposal_slot()?, None);

        store.save_proposal(32, SIGNING_ROOT).await?;
        store.save_proposal(64, SIGNING_ROOT).await?;

        assert_eq!(store.proposal_root_at_slot(32)?, Some(SIGNING_ROOT));
        assert_eq!(store.proposal_root_at_slot(64)?, Some(SIGNING_ROOT));
        assert_eq!(store.proposal_root_at_slot(48)?, None);
        assert_eq!(store.lowest_signed_proposal_slot()?, Some(32));

        Ok(())
    }

    //       S          T
    //                    S  T
    //   S     T
    // 1 2 3 4 5 6 7 8 9 10 11
    #[tokio::test]
    async fn surround_votes_are_detected() -> Result<()> {
        let (store, _lifetime_tx) = build_store();

        // Violations are not slashable on an empty store.
        assert_eq!(
            store.check_slashable_attestation(SIGNING_ROOT, 1, 6)?,
            SlashingKind::None,
        );

        store.save_attestation(SIGNING_ROOT, 2, 5).await?;
        store.save_attestation(SIGNING_ROOT, 10, 11).await?;
        store.save_attestation(SIGNING_ROOT, 4, 9).await?;

        // Surrounds (2, 5).
        assert_eq!(
            store.check_slashable_attestation(SIGNING_ROOT, 1, 6)?,
            SlashingKind::SurroundingVote,
        );

        // Surrounded by (4, 9).
        assert_eq!(
            store.check_slashable_attestation(SIGNING_ROOT, 7, 8)?,
            SlashingKind::SurroundedVote,
        );

        // Matches (2, 5) exactly.
        assert_eq!(
            store.check_slashable_attestation(SIGNING_ROOT, 2, 5)?,
            SlashingKind::None,
        );

        Ok(())
    }

    #[tokio::test]
    async fn double_votes_are_detected() -> Result<()> {
        let (store, _lifetime_tx) = build_store();

        store.save_attestation(SIGNING_ROOT, 0, 1).await?;

        assert_eq!(
            store.check_slashable_attestation(H256::repeat_byte(2), 0, 1)?,
            SlashingKind::DoubleVote,
        );

        assert_eq!(
            store.check_slashable_attestation(SIGNING_ROOT, 0, 1)?,
            SlashingKind::None,
        );

        Ok(())
    }

    #[tokio::test]
    async fn zero_stored_root_counts_as_unknown() -> Result<()> {
        let (store, _lifetime_tx) = build_store();

        store.save_attestation(H256::zero(), 0, 1).await?;

        assert_eq!(
            store.check_slashable_attestation(H256::zero(), 0, 1)?,
            SlashingKind::DoubleVote,
        );

        Ok(())
    }

    #[tokio::test]
    async fn history_lists_all_records() -> Result<()> {
        let (store, _lifetime_tx) = build_store();

        store.save_attestation(SIGNING_ROOT, 2, 5).await?;
        store.save_attestation(SIGNING_ROOT, 4, 9).await?;
        store.save_proposal(32, SIGNING_ROOT).await?;

        let attestations = store.attestation_history()?;
        let proposals = store.proposal_history()?;

        assert_eq!(
            attestations,
            [
                AttestationRecord {
                    source_epoch: 2,
                    target_epoch: 5,
                    signing_root: SIGNING_ROOT,
                },
                AttestationRecord {
                    source_epoch: 4,
                    target_epoch: 9,
                    signing_root: SIGNING_ROOT,
                },
            ],
        );

        assert_eq!(
            proposals,
            [ProposalRecord {
                slot: 32,
                signing_root: SIGNING_ROOT,
            }],
        );

        Ok(())
    }

    #[tokio::test]
    async fn history_survives_reopening() -> Result<()> {
        let directory = TempDir::new()?;
        let path = directory.path().join(store_file_name(
            "mainnet",
            PublicKeyBytes::repeat_byte(1),
        ));

        let (_lifetime_tx, lifetime_rx) = oneshot::channel();
        let store = Store::open(&path, lifetime_rx)?;

        store.save_attestation(SIGNING_ROOT, 2, 5).await?;
        store.save_proposal(32, SIGNING_ROOT).await?;
        store.close().await?;

        let (_lifetime_tx, lifetime_rx) = oneshot::channel();
        let store = Store::open(&path, lifetime_rx)?;

        assert_eq!(store.signing_root_at_target_epoch(5)?, Some(SIGNING_ROOT));
        assert_eq!(store.proposal_root_at_slot(32)?, Some(SIGNING_ROOT));
        assert_eq!(store.lowest_signed_source_epoch()?, Some(2));
        store.close().await?;

        Ok(())
    }

    #[tokio::test]
    async fn close_waits_for_queued_writes() -> Result<()> {
        let (store, _lifetime_tx) = build_store();
        let database = store.database.clone();

        store.save_attestation(SIGNING_ROOT, 2, 5).await?;
        store.close().await?;

        assert!(database.contains_key(attestation_key(5))?);

        Ok(())
    }
}
