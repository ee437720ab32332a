//! Wiring crate: loads a [`NodeConfig`], installs logging, and drives a
//! [`dpos_controller::Controller`] from a background polling thread.
//!
//! Everything chain-specific (`CommitteeView`, `Validator`, `Relay`,
//! `BlockSubmitter`) is supplied by the host process that embeds this crate;
//! `dpos-node` only owns the parts that are the same for every host:
//! config, logging, storage, and the maintenance loop.

pub mod config;

pub use config::NodeConfig;

use dpos_controller::{BlockSubmitter, Controller, Relay};
use dpos_core::{CommitteeView, Validator};
use dpos_store::Store;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("controller error: {0}")]
    Controller(#[from] dpos_controller::ControllerError),
    #[error(transparent)]
    Other(#[from] eyre::Report),
}

pub type Result<T> = std::result::Result<T, NodeError>;

/// Installs the process-wide logger. Idempotent: safe to call from multiple
/// test harnesses that each want logging enabled.
pub fn init_logging() {
    let _ = env_logger::builder().try_init();
}

/// A running finality-layer node: a `Controller` plus the background thread
/// that drives its periodic maintenance (readiness checks, stalemate
/// escape, tip-retention pruning).
pub struct Node {
    controller: Arc<Controller>,
    polling_period: Duration,
    running: Arc<AtomicBool>,
    poll_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    /// Opens the durable store at `config.store_path`, replays it into a
    /// fresh `Controller`, and returns a `Node` ready to `run()`.
    pub fn open(
        config: &NodeConfig,
        committee: Box<dyn CommitteeView>,
        validator: Box<dyn Validator>,
        relay: Box<dyn Relay>,
        submitter: Box<dyn BlockSubmitter>,
    ) -> Result<Self> {
        let store = dpos_store::SledStore::open(&config.store_path)
            .map_err(|e| eyre::eyre!("failed to open store at {}: {e}", config.store_path))?;
        Self::with_store(config, Box::new(store), committee, validator, relay, submitter)
    }

    /// As [`Node::open`], but takes an already-constructed `Store` (an
    /// in-memory one in tests, `SledStore` in production).
    pub fn with_store(
        config: &NodeConfig,
        store: Box<dyn Store + Send>,
        committee: Box<dyn CommitteeView>,
        validator: Box<dyn Validator>,
        relay: Box<dyn Relay>,
        submitter: Box<dyn BlockSubmitter>,
    ) -> Result<Self> {
        let controller = Controller::new(
            committee,
            validator,
            store,
            relay,
            submitter,
            config.operator_private_key.clone(),
            config.consensus.clone(),
        )?;
        controller.load_from_store()?;
        Ok(Node {
            controller: Arc::new(controller),
            polling_period: Duration::from_secs(config.consensus.polling_period_secs.max(1)),
            running: Arc::new(AtomicBool::new(false)),
            poll_thread: Mutex::new(None),
        })
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Spawns the background thread that calls `run_tick` and
    /// `remove_old_votes` every `polling_period_secs`. Returns immediately;
    /// call `shutdown` to stop it.
    pub fn run(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let controller = Arc::clone(&self.controller);
        let running = Arc::clone(&self.running);
        let period = self.polling_period;
        let handle = std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                std::thread::sleep(period);
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                controller.run_tick(Instant::now());
                if let Err(e) = controller.remove_old_votes() {
                    log::warn!("failed to prune old votes: {e}");
                }
            }
        });
        *self.poll_thread.lock().unwrap() = Some(handle);
    }

    /// Stops the background thread and waits for it to exit.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.poll_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown();
    }
}
