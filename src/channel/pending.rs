use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;

use crate::error::{PulseError, Result};
use crate::types::CorrelationId;

type Responder = oneshot::Sender<Result<Value>>;

struct Entry {
    label: String,
    responder: Responder,
}

/// Correlation-id keyed table of in-flight requests.
#[derive(Default)]
pub struct PendingCommands {
    entries: Mutex<HashMap<CorrelationId, Entry>>,
}

/// Removes its entry from the table when dropped, whatever the outcome.
pub struct PendingGuard<'a> {
    table: &'a PendingCommands,
    id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.entries().remove(&self.id);
    }
}

impl PendingCommands {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CorrelationId, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(
        &self,
        id: CorrelationId,
        label: &str,
    ) -> (PendingGuard<'_>, oneshot::Receiver<Result<Value>>) {
        let (responder, rx) = oneshot::channel();
        self.entries().insert(
            id,
            Entry {
                label: label.to_string(),
                responder,
            },
        );
        (PendingGuard { table: self, id }, rx)
    }

    /// Completes the request registered under `id`; an `Err` reply is the
    /// remote's rejection reason. Returns `false` for ids that are unknown
    /// or already expired.
    pub fn resolve(&self, id: CorrelationId, reply: std::result::Result<Value, String>) -> bool {
        let Some(entry) = self.entries().remove(&id) else {
            return false;
        };

        let reply = reply.map_err(|reason| PulseError::CommandRejected {
            command: entry.label,
            reason,
        });
        entry.responder.send(reply).is_ok()
    }

    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<Responder> = self
            .entries()
            .drain()
            .map(|(_, entry)| entry.responder)
            .collect();
        let count = drained.len();
        for responder in drained {
            let _ = responder.send(Err(PulseError::Connection(reason.to_string())));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
