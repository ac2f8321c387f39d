use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickRecord {
    pub period_secs: f64,
    pub fired: u64,
    pub last_fired: Option<DateTime<Utc>>,
}

/// Periodic tick source for the control loops.
///
/// Built on `tokio::time`, so a paused test runtime drives it
/// deterministically with `tokio::time::advance`.
pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    ticks: Arc<Mutex<BTreeMap<String, TickRecord>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
            ticks: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Runs `job` every `period`, first firing one period from now.
    /// A job still running when the next tick is due delays that tick.
    pub fn every<F, Fut>(&self, name: &str, period: Duration, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.to_string();
        let ticks = self.ticks.clone();
        let mut shutdown = self.shutdown_tx.subscribe();

        ticks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                name.clone(),
                TickRecord {
                    period_secs: period.as_secs_f64(),
                    fired: 0,
                    last_fired: None,
                },
            );

        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = interval.tick() => {
                        if let Some(record) = ticks.lock().unwrap_or_else(|e| e.into_inner()).get_mut(&name) {
                            record.fired += 1;
                            record.last_fired = Some(Utc::now());
                        }
                        log::debug!("{} loop tick", name);
                        job().await;
                    }
                }
            }
            log::debug!("{} loop stopped", name);
        });

        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    pub fn ticks(&self) -> BTreeMap<String, TickRecord> {
        self.ticks.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Stops every loop and waits for them to exit. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();

        for handle in handles {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
