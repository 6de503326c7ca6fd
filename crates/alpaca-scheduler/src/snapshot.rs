use std::collections::BTreeMap;

use alpaca_core::Status;
use alpaca_store::unix_time_ms;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Scheduler, SchedulerError};

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// The full status table at one point in time, in step and registration
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMatrix {
    pub steps: Vec<String>,
    pub rows: Vec<StatusRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRow {
    pub sample: String,
    pub statuses: BTreeMap<String, Status>,
}

impl StatusMatrix {
    pub fn get(&self, sample: &str, step: &str) -> Option<Status> {
        self.rows
            .iter()
            .find(|r| r.sample == sample)
            .and_then(|r| r.statuses.get(step).copied())
    }
}

/// On-disk form written by [`Scheduler::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub schema_version: u32,
    pub taken_unix_time_ms: u64,
    pub table: StatusMatrix,
}

impl StatusSnapshot {
    pub fn new(table: StatusMatrix) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            taken_unix_time_ms: unix_time_ms(),
            table,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl Scheduler {
    /// Captures every row, one sample lock at a time.
    ///
    /// Rows are read under their own lock but not all at once, so the result
    /// is consistent per sample only.
    pub async fn capture(&self) -> StatusMatrix {
        let (steps, rows) = {
            let registry = self.registry.read().await;
            let steps: Vec<String> = registry.pipeline.names().map(str::to_string).collect();
            (steps, registry.rows.clone())
        };

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let statuses = row.lock().await;
            out.push(StatusRow {
                sample: row.id().to_string(),
                statuses: steps
                    .iter()
                    .filter_map(|s| statuses.get(s).map(|st| (s.clone(), *st)))
                    .collect(),
            });
        }
        StatusMatrix { steps, rows: out }
    }

    /// Writes the table to the configured store and returns its location.
    pub async fn snapshot(&self) -> Result<String, SchedulerError> {
        let Some(store) = self.store.clone() else {
            return Err(SchedulerError::Unavailable);
        };

        let snapshot = StatusSnapshot::new(self.capture().await);
        let bytes = snapshot.encode()?;
        let len = bytes.len();
        let location = store.location();
        // Blocking file I/O.
        tokio::task::spawn_blocking(move || store.put_snapshot(&bytes)).await??;

        info!(
            target: "alpaca_proof",
            event = "snapshot_written",
            location = %location,
            samples = snapshot.table.rows.len() as u64,
            steps = snapshot.table.steps.len() as u64,
            bytes = len as u64,
            "snapshot written"
        );
        Ok(location)
    }
}
