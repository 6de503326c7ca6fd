#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

//! In-memory status table and the claim/report protocol.
//!
//! Every sample owns one row mapping step name to [`Status`]. The row's mutex
//! is the per-sample exclusive section: readiness-check-then-claim and status
//! reports on one sample never interleave. The step list, sample order and
//! metadata sit behind a read/write lock and only grow; reloads additionally
//! serialize on a dedicated mutex so two reloads never append the same entry.

pub mod export;
mod reload;
pub mod snapshot;
mod table;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use alpaca_core::{ConfigError, Pipeline, SampleRegistry, Status, StatusParseError};
use alpaca_store::{SnapshotStore, SnapshotStoreError};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

pub use export::{parse_export, ExportParseError};
pub use reload::ReloadOutcome;
pub use snapshot::{StatusMatrix, StatusRow, StatusSnapshot, SNAPSHOT_SCHEMA_VERSION};

use table::SampleRow;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    InvalidStatus(#[from] StatusParseError),
    #[error("unknown metadata fields: {}", .0.join(", "))]
    InvalidFields(Vec<String>),
    #[error("snapshot destination is not configured")]
    Unavailable,
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("snapshot store error: {0}")]
    Store(#[from] SnapshotStoreError),
    #[error("snapshot encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("blocking file task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Files the pipeline definition and sample list are (re)loaded from.
#[derive(Debug, Clone)]
pub struct Sources {
    pub pipeline_path: PathBuf,
    pub samples_path: PathBuf,
}

#[derive(Debug, Default)]
struct Registry {
    pipeline: Pipeline,
    samples: SampleRegistry,
    rows: Vec<Arc<SampleRow>>,
    index: HashMap<String, Arc<SampleRow>>,
}

impl Registry {
    fn new(pipeline: Pipeline, samples: SampleRegistry) -> Self {
        let steps: Vec<String> = pipeline.names().map(str::to_string).collect();
        let mut registry = Registry {
            pipeline,
            samples: SampleRegistry::default(),
            rows: Vec::new(),
            index: HashMap::new(),
        };
        for id in samples.samples() {
            registry.push_row(Arc::new(SampleRow::new(id, &steps)));
        }
        registry.samples = samples;
        registry
    }

    fn push_row(&mut self, row: Arc<SampleRow>) {
        self.index.insert(row.id().to_string(), row.clone());
        self.rows.push(row);
    }
}

pub struct Scheduler {
    registry: RwLock<Registry>,
    reload: Mutex<()>,
    sources: Option<Sources>,
    store: Option<Arc<dyn SnapshotStore>>,
}

impl Scheduler {
    /// Builds a table with every (sample, step) pair `UNPROCESSED`.
    pub fn new(pipeline: Pipeline, samples: SampleRegistry) -> Self {
        Self {
            registry: RwLock::new(Registry::new(pipeline, samples)),
            reload: Mutex::new(()),
            sources: None,
            store: None,
        }
    }

    /// Loads both sources; any failure here should abort startup.
    pub fn from_sources(sources: Sources) -> Result<Self, ConfigError> {
        let pipeline = Pipeline::load(&sources.pipeline_path)?;
        let samples = SampleRegistry::load(&sources.samples_path)?;
        let mut scheduler = Self::new(pipeline, samples);
        scheduler.sources = Some(sources);
        Ok(scheduler)
    }

    pub fn with_snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Claims the first sample, in registration order, that is ready for
    /// `step` and marks it `DISTRIBUTED`. `None` if nothing is ready or the
    /// step is unknown.
    pub async fn claim(&self, step: &str) -> Option<String> {
        let (upstream, rows) = {
            let registry = self.registry.read().await;
            let def = registry.pipeline.step(step)?;
            (def.upstream.clone(), registry.rows.clone())
        };

        for row in rows {
            let mut statuses = row.lock().await;
            if table::is_ready(&statuses, step, &upstream) {
                statuses.insert(step.to_string(), Status::Distributed);
                debug!(
                    target: "alpaca_proof",
                    event = "claimed",
                    step = %step,
                    sample = %row.id(),
                    "sample claimed"
                );
                return Some(row.id().to_string());
            }
        }
        None
    }

    /// Like [`Scheduler::claim`], but also returns the requested metadata
    /// values in request order. Field names are validated before anything is
    /// claimed.
    pub async fn claim_with_metadata(
        &self,
        step: &str,
        fields: &[String],
    ) -> Result<(String, Vec<String>), SchedulerError> {
        {
            let registry = self.registry.read().await;
            let unknown: Vec<String> = fields
                .iter()
                .filter(|f| !registry.samples.has_field(f))
                .cloned()
                .collect();
            if !unknown.is_empty() {
                return Err(SchedulerError::InvalidFields(unknown));
            }
        }

        let sample = self
            .claim(step)
            .await
            .ok_or_else(|| SchedulerError::NotFound("no ready samples".to_string()))?;
        let values = self
            .registry
            .read()
            .await
            .samples
            .field_values(&sample, fields);
        Ok((sample, values))
    }

    /// Sets the status of (sample, step) unconditionally.
    pub async fn report(
        &self,
        step: &str,
        sample: &str,
        status: Status,
    ) -> Result<(), SchedulerError> {
        let row = {
            let registry = self.registry.read().await;
            if !registry.pipeline.contains(step) {
                return Err(SchedulerError::NotFound(format!("unknown step {step:?}")));
            }
            registry
                .index
                .get(sample)
                .cloned()
                .ok_or_else(|| SchedulerError::NotFound(format!("unknown sample {sample:?}")))?
        };

        let mut statuses = row.lock().await;
        let Some(slot) = statuses.get_mut(step) else {
            return Err(SchedulerError::NotFound(format!("unknown step {step:?}")));
        };
        let previous = std::mem::replace(slot, status);
        debug!(
            target: "alpaca_proof",
            event = "reported",
            step = %step,
            sample = %sample,
            status = %status,
            previous = %previous,
            "status reported"
        );
        Ok(())
    }

    /// [`Scheduler::report`] with a status name as sent by workers.
    pub async fn report_named(
        &self,
        step: &str,
        sample: &str,
        status: &str,
    ) -> Result<Status, SchedulerError> {
        let status: Status = status.parse()?;
        self.report(step, sample, status).await?;
        Ok(status)
    }

    pub async fn status_of(&self, sample: &str, step: &str) -> Option<Status> {
        let row = self.registry.read().await.index.get(sample).cloned()?;
        let statuses = row.lock().await;
        statuses.get(step).copied()
    }

    pub async fn steps(&self) -> Vec<String> {
        let registry = self.registry.read().await;
        registry.pipeline.names().map(str::to_string).collect()
    }

    pub async fn samples(&self) -> Vec<String> {
        self.registry.read().await.samples.samples().to_vec()
    }

    pub async fn fields(&self) -> Vec<String> {
        self.registry.read().await.samples.fields().to_vec()
    }

    pub async fn step_count(&self) -> usize {
        self.registry.read().await.pipeline.len()
    }

    pub async fn sample_count(&self) -> usize {
        self.registry.read().await.rows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alpaca_core::Step;

    fn scheduler() -> Scheduler {
        let pipeline = Pipeline::new(vec![Step::new("align", &[]), Step::new("call", &["align"])])
            .unwrap();
        let samples = SampleRegistry::parse("sample\ns1\ns2\n").unwrap();
        Scheduler::new(pipeline, samples)
    }

    #[tokio::test]
    async fn new_table_is_fully_unprocessed() {
        let s = scheduler();
        for sample in ["s1", "s2"] {
            for step in ["align", "call"] {
                assert_eq!(s.status_of(sample, step).await, Some(Status::Unprocessed));
            }
        }
        assert_eq!(s.sample_count().await, 2);
        assert_eq!(s.step_count().await, 2);
    }

    #[tokio::test]
    async fn claim_on_unknown_step_is_none() {
        let s = scheduler();
        assert_eq!(s.claim("nope").await, None);
    }

    #[tokio::test]
    async fn report_on_unknown_step_is_not_found() {
        let s = scheduler();
        let err = s.report("nope", "s1", Status::Complete).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)), "{err:?}");
    }

    #[tokio::test]
    async fn invalid_status_name_does_not_mutate() {
        let s = scheduler();
        let err = s.report_named("align", "s1", "done").await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidStatus(_)), "{err:?}");
        assert_eq!(s.status_of("s1", "align").await, Some(Status::Unprocessed));
    }
}
