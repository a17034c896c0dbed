use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::Result;
use futures::channel::oneshot;
use kvstore::{store_file_name, Store};
use thiserror::Error;
use tokio::sync::Semaphore;
use types::primitives::PublicKeyBytes;

use crate::conn::Conn;

#[derive(Debug, Error)]
pub enum Error {
    #[error("connection not acquired")]
    NotAcquired,
    #[error("connection pool is closed")]
    PoolClosed,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
struct ConnId {
    network: String,
    pub_key: PublicKeyBytes,
}

struct Gate {
    semaphore: Arc<Semaphore>,
    path: PathBuf,
}

/// A pool of per-validator history stores with a single connection per
/// public key in a network.
///
/// Distinct keys make independent progress. Waiters for the same key are
/// served in the order they arrived. The pool mutex only guards map
/// operations, never I/O.
pub struct Pool {
    directory: PathBuf,
    gates: Mutex<HashMap<ConnId, Arc<Gate>>>,
    open_stores: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl Pool {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            gates: Mutex::default(),
            open_stores: Arc::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// Waits for the key's permit, opens the underlying store and returns an
    /// exclusive handle. The caller must call [`Conn::release`] when done.
    ///
    /// Waiting is cancel-safe: dropping the returned future leaves no permit
    /// held. If the store fails to open, the permit is released before the
    /// error is returned.
    pub async fn acquire(&self, network: &str, pub_key: PublicKeyBytes) -> Result<Conn> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::PoolClosed.into());
        }

        let gate = self.get_or_create(network, pub_key);

        let permit = gate
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_closed| Error::PoolClosed)?;

        // The store's write worker outlives any single request, so its
        // lifetime signal is owned by the handle rather than the caller.
        // `Conn::release` fires it only after the store has been closed.
        let (lifetime_tx, lifetime_rx) = oneshot::channel();
        let store = Store::open(&gate.path, lifetime_rx)?;

        self.open_stores.fetch_add(1, Ordering::Relaxed);

        Ok(Conn::new(
            store,
            permit,
            lifetime_tx,
            self.open_stores.clone(),
        ))
    }

    /// Closes the pool. Pending `acquire` calls fail with
    /// [`Error::PoolClosed`]. Safe to call after the last handle has been
    /// released; stores are closed when their handles are.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);

        let mut gates = self.gates.lock().expect("pool mutex is poisoned");

        for gate in gates.values() {
            gate.semaphore.close();
        }

        gates.clear();
    }

    /// Number of handles currently holding an open store.
    #[must_use]
    pub fn acquired_count(&self) -> usize {
        self.open_stores.load(Ordering::Relaxed)
    }

    fn get_or_create(&self, network: &str, pub_key: PublicKeyBytes) -> Arc<Gate> {
        let id = ConnId {
            network: network.to_owned(),
            pub_key,
        };

        self.gates
            .lock()
            .expect("pool mutex is poisoned")
            .entry(id)
            .or_insert_with(|| {
                Arc::new(Gate {
                    semaphore: Arc::new(Semaphore::new(1)),
                    path: self.directory.join(store_file_name(network, pub_key)),
                })
            })
            .clone()
    }
}
