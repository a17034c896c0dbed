use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use anyhow::Result;
use futures::channel::oneshot::Sender;
use kvstore::Store;
use log::debug;
use tokio::sync::OwnedSemaphorePermit;

use crate::pool::Error;

/// An exclusive handle to one validator's history store.
///
/// Holds the key's permit and the store's lifetime signal. The normal exit
/// path is [`Conn::release`]; dropping an unreleased handle still releases
/// the permit and lets the store's write worker drain on its own.
pub struct Conn {
    store: Option<Store>,
    permit: Option<OwnedSemaphorePermit>,
    lifetime_tx: Option<Sender<()>>,
    open_stores: Arc<AtomicUsize>,
}

impl Conn {
    pub(crate) fn new(
        store: Store,
        permit: OwnedSemaphorePermit,
        lifetime_tx: Sender<()>,
        open_stores: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            store: Some(store),
            permit: Some(permit),
            lifetime_tx: Some(lifetime_tx),
            open_stores,
        }
    }

    pub fn store(&self) -> Result<&Store> {
        self.store.as_ref().ok_or_else(|| Error::NotAcquired.into())
    }

    /// Closes the store and releases the permit.
    ///
    /// The order is load-bearing: the store must be closed before the
    /// lifetime signal fires, otherwise queued writes lose their
    /// acknowledgements. The permit is released even when closing fails.
    /// A second call returns [`Error::NotAcquired`].
    pub async fn release(&mut self) -> Result<()> {
        let Some(store) = self.store.take() else {
            return Err(Error::NotAcquired.into());
        };

        self.open_stores.fetch_sub(1, Ordering::Relaxed);

        let result = store.close().await;

        if let Some(lifetime_tx) = self.lifetime_tx.take() {
            let _ = lifetime_tx.send(());
        }

        drop(self.permit.take());

        result
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        if let Some(store) = self.store.take() {
            debug!("connection dropped without release");
            self.open_stores.fetch_sub(1, Ordering::Relaxed);
            // Dropping the store closes its write channel. The worker drains
            // whatever was queued and then stops on its own.
            drop(store);
        }
    }
}
