//! Background tasks owned by a client
//!
//! Both handles abort their task when stopped or dropped, so tearing down a
//! client is a matter of dropping what `start_background_sync` and
//! `watch_storage` returned.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Periodic reconciliation task
#[derive(Debug)]
pub struct SyncWorker {
    handle: Option<JoinHandle<()>>,
    period: Duration,
}

impl SyncWorker {
    /// Run `tick` every `period`, starting one period from now. A slow tick
    /// delays the next one instead of bunching them up.
    pub fn spawn<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                tick().await;
            }
        });
        tracing::debug!(?period, "background sync started");
        Self {
            handle: Some(handle),
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the loop. Idempotent.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            tracing::debug!("background sync stopped");
        }
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Task applying other tabs' storage changes
#[derive(Debug)]
pub struct StorageWatcher {
    handle: Option<JoinHandle<()>>,
}

impl StorageWatcher {
    pub(crate) fn spawn<Fut>(task: Fut) -> Self
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: Some(tokio::spawn(task)),
        }
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for StorageWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
