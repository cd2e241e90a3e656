//! Shared daemon context: configuration, storage handle, metrics, and
//! cooperative shutdown signalling.
//!
//! Modeled on the signer crate's `Context` trait: every long-running loop
//! (here, [`crate::monitor::ChainMonitor::run`]) takes a termination
//! handle from the context and selects on it alongside its own work, so a
//! shutdown signal is observed between suspension points rather than
//! forcibly cancelling in-flight work.

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::Settings;
use crate::error::Error;
use crate::storage::Storage;

/// A handle for observing and triggering cooperative shutdown.
#[derive(Debug, Clone)]
pub struct TerminationHandle {
    rx: watch::Receiver<bool>,
    tx: Arc<watch::Sender<bool>>,
}

impl TerminationHandle {
    /// Block until a shutdown has been signalled.
    pub async fn wait_for_shutdown(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        // A closed sender (context dropped) is treated the same as a
        // shutdown signal: there is nothing left to wait for.
        let _ = self.rx.changed().await;
    }

    /// Whether a shutdown has already been signalled.
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Signal every holder of a handle derived from the same context to
    /// shut down.
    pub fn signal_shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// The daemon-wide context threaded through every chain monitor.
///
/// Cloning an `AppContext` is cheap: the storage handle and settings are
/// held behind `Arc`, and the termination channel is shared.
#[derive(Clone)]
pub struct AppContext<S> {
    settings: Arc<Settings>,
    storage: S,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S> AppContext<S>
where
    S: Storage + Clone,
{
    /// Build a new context over the given settings and storage gateway.
    pub fn new(settings: Settings, storage: S) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            settings: Arc::new(settings),
            storage,
            shutdown_tx: Arc::new(tx),
            shutdown_rx: rx,
        }
    }

    /// The daemon's settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// A handle to the storage gateway.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// A fresh termination handle observing this context's shutdown
    /// channel.
    pub fn termination_handle(&self) -> TerminationHandle {
        TerminationHandle {
            rx: self.shutdown_rx.clone(),
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Broadcast a shutdown signal to every monitor holding a handle from
    /// this context.
    pub fn signal_shutdown(&self) -> Result<(), Error> {
        self.shutdown_tx
            .send(true)
            .map_err(|_| Error::SignalChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use std::collections::HashMap;

    fn test_settings() -> Settings {
        Settings {
            database_url: "postgres://localhost/test".into(),
            log_format: Default::default(),
            metrics_enabled: false,
            endpoints: HashMap::new(),
            timing: HashMap::new(),
            confirmations: HashMap::new(),
            btc_batch_size: 50,
            trx_batch_size: 5,
            rpc_timeout_secs: 30,
        }
    }

    #[tokio::test]
    async fn termination_handle_observes_signal() {
        let ctx = AppContext::new(test_settings(), MemoryStorage::new());
        let mut handle = ctx.termination_handle();
        assert!(!handle.is_shutdown());

        ctx.signal_shutdown().unwrap();
        handle.wait_for_shutdown().await;
        assert!(handle.is_shutdown());
    }

    #[tokio::test]
    async fn multiple_handles_all_observe_the_same_signal() {
        let ctx = AppContext::new(test_settings(), MemoryStorage::new());
        let mut h1 = ctx.termination_handle();
        let mut h2 = ctx.termination_handle();

        ctx.signal_shutdown().unwrap();
        h1.wait_for_shutdown().await;
        h2.wait_for_shutdown().await;
        assert!(h1.is_shutdown());
        assert!(h2.is_shutdown());
    }
}
