use std::sync::Arc;

use alpaca_core::{ConfigError, Pipeline, SampleRegistry, Status, Step};
use tracing::info;

use crate::table::SampleRow;
use crate::{Scheduler, SchedulerError, Sources};

/// What a reload appended; empty when the source held nothing new.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadOutcome {
    pub added: Vec<String>,
}

impl Scheduler {
    /// Re-reads the pipeline file and appends new steps, backfilling them as
    /// `UNPROCESSED` for every sample. On error nothing changes.
    pub async fn reload_pipeline(&self) -> Result<ReloadOutcome, SchedulerError> {
        let _reload = self.reload.lock().await;
        let path = self.sources()?.pipeline_path.clone();
        let current = self.registry.read().await.pipeline.clone();
        let (merged, added) =
            tokio::task::spawn_blocking(move || current.merge_from(&path)).await??;
        self.publish_pipeline(merged, added).await
    }

    /// Merges `steps` directly, without reading the pipeline file.
    pub async fn merge_steps(&self, steps: Vec<Step>) -> Result<ReloadOutcome, SchedulerError> {
        let _reload = self.reload.lock().await;
        let current = self.registry.read().await.pipeline.clone();
        let (merged, added) = current.merge(steps)?;
        self.publish_pipeline(merged, added).await
    }

    /// Re-reads the sample list and appends unseen samples in file order.
    pub async fn reload_samples(&self) -> Result<ReloadOutcome, SchedulerError> {
        let _reload = self.reload.lock().await;
        let path = self.sources()?.samples_path.clone();
        let current = self.registry.read().await.samples.clone();
        let (merged, added) =
            tokio::task::spawn_blocking(move || current.merge_from(&path)).await??;
        self.publish_samples(merged, added).await
    }

    /// Merges an already parsed sample list.
    pub async fn merge_samples(
        &self,
        incoming: &SampleRegistry,
    ) -> Result<ReloadOutcome, SchedulerError> {
        let _reload = self.reload.lock().await;
        let (merged, added) = self.registry.read().await.samples.merge(incoming);
        self.publish_samples(merged, added).await
    }

    fn sources(&self) -> Result<&Sources, SchedulerError> {
        self.sources.as_ref().ok_or_else(|| {
            SchedulerError::Config(ConfigError::Invalid(
                "scheduler was built without source files".to_string(),
            ))
        })
    }

    // Caller holds the reload lock.
    async fn publish_pipeline(
        &self,
        merged: Pipeline,
        added: Vec<String>,
    ) -> Result<ReloadOutcome, SchedulerError> {
        if !added.is_empty() {
            // Backfill before publishing, so a claim never sees a published
            // step that some row lacks.
            let rows = self.registry.read().await.rows.clone();
            for row in rows {
                let mut statuses = row.lock().await;
                for name in &added {
                    statuses
                        .entry(name.clone())
                        .or_insert(Status::Unprocessed);
                }
            }
            self.registry.write().await.pipeline = merged;
        }

        info!(
            target: "alpaca_proof",
            event = "pipeline_reloaded",
            added = added.len() as u64,
            steps = ?added,
            "pipeline reloaded"
        );
        Ok(ReloadOutcome { added })
    }

    // Caller holds the reload lock, so `merged` was computed from the
    // registry's current samples.
    async fn publish_samples(
        &self,
        merged: SampleRegistry,
        added: Vec<String>,
    ) -> Result<ReloadOutcome, SchedulerError> {
        let mut registry = self.registry.write().await;
        let steps: Vec<String> = registry.pipeline.names().map(str::to_string).collect();
        for id in &added {
            registry.push_row(Arc::new(SampleRow::new(id, &steps)));
        }
        registry.samples = merged;
        drop(registry);

        info!(
            target: "alpaca_proof",
            event = "samples_reloaded",
            added = added.len() as u64,
            "samples reloaded"
        );
        Ok(ReloadOutcome { added })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reload_without_sources_is_config_error() {
        let s = Scheduler::new(Pipeline::default(), SampleRegistry::default());
        let err = s.reload_pipeline().await.unwrap_err();
        assert!(matches!(err, SchedulerError::Config(_)), "{err:?}");
        let err = s.reload_samples().await.unwrap_err();
        assert!(matches!(err, SchedulerError::Config(_)), "{err:?}");
    }

    #[tokio::test]
    async fn merging_nothing_new_is_a_no_op() {
        let pipeline = Pipeline::new(vec![Step::new("align", &[])]).unwrap();
        let samples = SampleRegistry::parse("sample\ns1\n").unwrap();
        let s = Scheduler::new(pipeline, samples.clone());

        let outcome = s.merge_steps(vec![Step::new("align", &[])]).await.unwrap();
        assert!(outcome.added.is_empty());
        let outcome = s.merge_samples(&samples).await.unwrap();
        assert!(outcome.added.is_empty());
        assert_eq!(s.sample_count().await, 1);
    }
}
