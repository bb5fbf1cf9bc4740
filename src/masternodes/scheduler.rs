// SPDX-License-Identifier: CC0-1.0

//! Tip-advance scheduling glue.
//!
//! A small reactive worker: the node notifies it of new chain tips, and it
//! drives the payment engine's voting and pruning plus the governance
//! trigger sweep from its own thread. Nothing here initiates work on its
//! own beyond a periodic maintenance pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info};

use crate::governance::classes::GovernanceTriggerManager;
use crate::masternodes::payments::PaymentEngine;
use crate::masternodes::registry::ActiveMasternode;

/// How often the maintenance pass runs with no tip activity.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// Drives vote broadcast and pruning off tip-advance notifications.
pub struct PaymentsScheduler {
    sender: Sender<u32>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PaymentsScheduler {
    /// Spawns the scheduler thread.
    ///
    /// `active` is the local masternode identity; pass `None` on nodes that
    /// only observe.
    pub fn start(
        engine: Arc<PaymentEngine>,
        triggers: Arc<GovernanceTriggerManager>,
        active: Option<ActiveMasternode>,
    ) -> PaymentsScheduler {
        let (sender, receiver) = mpsc::channel::<u32>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("mnpayments".to_owned())
            .spawn(move || {
                info!("payments scheduler started");
                loop {
                    if shutdown_flag.load(Ordering::SeqCst) {
                        break;
                    }
                    match receiver.recv_timeout(MAINTENANCE_INTERVAL) {
                        Ok(height) => {
                            engine.updated_block_tip(height, active.as_ref());
                            if shutdown_flag.load(Ordering::SeqCst) {
                                break;
                            }
                            triggers.clean_and_remove(height);
                            engine.check_and_remove();
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            debug!("payments maintenance pass");
                            engine.check_and_remove();
                            if shutdown_flag.load(Ordering::SeqCst) {
                                break;
                            }
                            triggers.clean_and_remove(engine.cached_height());
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("payments scheduler stopped");
            })
            .expect("failed to spawn payments scheduler thread");

        PaymentsScheduler { sender, shutdown, handle: Some(handle) }
    }

    /// Notifies the scheduler of a new chain tip.
    ///
    /// Returns whether the notification was delivered.
    pub fn notify_tip(&self, height: u32) -> bool {
        self.sender.send(height).is_ok()
    }

    /// Requests shutdown and joins the worker thread.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.join_worker();
    }

    fn join_worker(&mut self) {
        // Dropping our sender wakes the worker out of recv_timeout.
        let (disconnected, _) = mpsc::channel::<u32>();
        let _ = std::mem::replace(&mut self.sender, disconnected);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PaymentsScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.join_worker();
    }
}
