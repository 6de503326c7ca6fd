use std::path::PathBuf;
use std::sync::Arc;

use alpaca_core::{SampleRegistry, Status, Step};
use alpaca_scheduler::{Scheduler, SchedulerError, Sources};

fn temp_dir(test_name: &str) -> anyhow::Result<PathBuf> {
    let mut root = std::env::temp_dir();
    root.push(format!(
        "alpaca-scheduler-{test_name}-{}-{}",
        std::process::id(),
        alpaca_store::unix_time_ms()
    ));
    std::fs::create_dir_all(&root)?;
    Ok(root)
}

struct Fixture {
    sources: Sources,
}

impl Fixture {
    fn new(test_name: &str, tasks: &str, samples: &str) -> anyhow::Result<Self> {
        let root = temp_dir(test_name)?;
        let sources = Sources {
            pipeline_path: root.join("tasks.json"),
            samples_path: root.join("samples.tsv"),
        };
        std::fs::write(&sources.pipeline_path, tasks)?;
        std::fs::write(&sources.samples_path, samples)?;
        Ok(Self { sources })
    }

    fn write_tasks(&self, tasks: &str) -> anyhow::Result<()> {
        std::fs::write(&self.sources.pipeline_path, tasks)?;
        Ok(())
    }

    fn write_samples(&self, samples: &str) -> anyhow::Result<()> {
        std::fs::write(&self.sources.samples_path, samples)?;
        Ok(())
    }

    fn scheduler(&self) -> anyhow::Result<Scheduler> {
        Ok(Scheduler::from_sources(self.sources.clone())?)
    }
}

const TASKS_V1: &str = r#"{"pipeline": [
    {"name": "align", "upstream": []},
    {"name": "call", "upstream": ["align"]}
]}"#;

const TASKS_V2: &str = r#"{"pipeline": [
    {"name": "align", "upstream": []},
    {"name": "call", "upstream": ["align"]},
    {"name": "annotate", "upstream": ["call"]}
]}"#;

#[tokio::test]
async fn startup_fails_on_malformed_sources() -> anyhow::Result<()> {
    let fx = Fixture::new("bad-startup", r#"{"pipeline": [{"name": "x"}]}"#, "sample\ns1\n")?;
    assert!(fx.scheduler().is_err());

    let fx = Fixture::new("bad-samples", TASKS_V1, "sample\tlane\ns1\n")?;
    assert!(fx.scheduler().is_err());
    Ok(())
}

#[tokio::test]
async fn pipeline_reload_is_additive_and_backfills() -> anyhow::Result<()> {
    let fx = Fixture::new("pipeline-additive", TASKS_V1, "sample\ns1\ns2\n")?;
    let s = fx.scheduler()?;

    s.report("align", "s1", Status::Complete).await?;
    s.report("call", "s1", Status::Error).await?;
    assert_eq!(s.claim("align").await.as_deref(), Some("s2"));
    let before = s.capture().await;

    fx.write_tasks(TASKS_V2)?;
    let outcome = s.reload_pipeline().await?;
    assert_eq!(outcome.added, vec!["annotate".to_string()]);
    assert_eq!(s.steps().await, vec!["align", "call", "annotate"]);

    let after = s.capture().await;
    for row in &before.rows {
        for (step, status) in &row.statuses {
            assert_eq!(after.get(&row.sample, step), Some(*status));
        }
        assert_eq!(after.get(&row.sample, "annotate"), Some(Status::Unprocessed));
    }

    // A second reload of the same file appends nothing.
    assert!(s.reload_pipeline().await?.added.is_empty());
    Ok(())
}

#[tokio::test]
async fn new_step_is_claimable_after_reload() -> anyhow::Result<()> {
    let fx = Fixture::new("new-step", TASKS_V1, "sample\ns1\n")?;
    let s = fx.scheduler()?;
    s.report("align", "s1", Status::Complete).await?;
    s.report("call", "s1", Status::Complete).await?;
    assert_eq!(s.claim("annotate").await, None);

    fx.write_tasks(TASKS_V2)?;
    s.reload_pipeline().await?;
    assert_eq!(s.claim("annotate").await.as_deref(), Some("s1"));
    Ok(())
}

#[tokio::test]
async fn invalid_pipeline_reload_leaves_state_untouched() -> anyhow::Result<()> {
    let fx = Fixture::new("pipeline-invalid", TASKS_V1, "sample\ns1\n")?;
    let s = fx.scheduler()?;
    let before = s.capture().await;

    fx.write_tasks(
        r#"{"pipeline": [
            {"name": "align", "upstream": []},
            {"name": "qc", "upstream": ["missing"]}
        ]}"#,
    )?;
    let err = s.reload_pipeline().await.unwrap_err();
    assert!(matches!(err, SchedulerError::Config(_)), "{err:?}");

    fx.write_tasks("{ not json")?;
    assert!(s.reload_pipeline().await.is_err());

    assert_eq!(s.capture().await, before);
    Ok(())
}

#[tokio::test]
async fn sample_reload_appends_in_source_order() -> anyhow::Result<()> {
    let fx = Fixture::new("samples-order", TASKS_V1, "sample\ns1\ns2\n")?;
    let s = fx.scheduler()?;
    assert_eq!(s.claim("align").await.as_deref(), Some("s1"));

    fx.write_samples("sample\ns9\ns2\ns1\ns5\n")?;
    let outcome = s.reload_samples().await?;
    assert_eq!(outcome.added, vec!["s9".to_string(), "s5".to_string()]);
    assert_eq!(s.samples().await, vec!["s1", "s2", "s9", "s5"]);

    // Existing progress is kept and the new samples start unprocessed.
    assert_eq!(s.status_of("s1", "align").await, Some(Status::Distributed));
    assert_eq!(s.status_of("s9", "call").await, Some(Status::Unprocessed));

    assert_eq!(s.claim("align").await.as_deref(), Some("s2"));
    assert_eq!(s.claim("align").await.as_deref(), Some("s9"));
    assert_eq!(s.claim("align").await.as_deref(), Some("s5"));
    Ok(())
}

#[tokio::test]
async fn sample_reload_adds_metadata_fields() -> anyhow::Result<()> {
    let fx = Fixture::new("samples-fields", TASKS_V1, "sample\ns1\n")?;
    let s = fx.scheduler()?;
    assert!(s.fields().await.is_empty());

    fx.write_samples("sample\tfastq\ns1\t/d/s1.fq\ns2\t/d/s2.fq\n")?;
    s.reload_samples().await?;
    assert_eq!(s.fields().await, vec!["fastq"]);

    let (sample, values) = s.claim_with_metadata("align", &["fastq".to_string()]).await?;
    assert_eq!(sample, "s1");
    assert_eq!(values, vec!["/d/s1.fq".to_string()]);
    Ok(())
}

#[tokio::test]
async fn broken_sample_reload_is_reported() -> anyhow::Result<()> {
    let fx = Fixture::new("samples-broken", TASKS_V1, "sample\ns1\n")?;
    let s = fx.scheduler()?;

    fx.write_samples("sample\tfastq\ns2\n")?;
    let err = s.reload_samples().await.unwrap_err();
    assert!(matches!(err, SchedulerError::Config(_)), "{err:?}");
    assert_eq!(s.samples().await, vec!["s1"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reloads_append_once() -> anyhow::Result<()> {
    let fx = Fixture::new("concurrent-reload", TASKS_V1, "sample\ns1\n")?;
    let s = Arc::new(fx.scheduler()?);
    fx.write_tasks(TASKS_V2)?;
    fx.write_samples("sample\ns1\ns2\ns3\n")?;

    let mut handles = Vec::new();
    for i in 0..8 {
        let s = s.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                s.reload_pipeline().await.map(|o| o.added.len())
            } else {
                s.reload_samples().await.map(|o| o.added.len())
            }
        }));
    }
    let mut added = 0usize;
    for h in handles {
        added += h.await??;
    }

    // One new step and two new samples, each appended exactly once.
    assert_eq!(added, 3);
    assert_eq!(s.step_count().await, 3);
    assert_eq!(s.samples().await, vec!["s1", "s2", "s3"]);
    for sample in ["s1", "s2", "s3"] {
        assert_eq!(s.status_of(sample, "annotate").await, Some(Status::Unprocessed));
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn claims_during_reload_see_consistent_rows() -> anyhow::Result<()> {
    let ids: Vec<String> = (0..100).map(|i| format!("s{i}")).collect();
    let s = Arc::new(Scheduler::new(
        alpaca_core::Pipeline::new(vec![Step::new("align", &[])])?,
        SampleRegistry::parse(&format!("sample\n{}\n", ids.join("\n")))?,
    ));
    for id in &ids {
        s.report("align", id, Status::Complete).await?;
    }

    let claimer = tokio::spawn({
        let s = s.clone();
        async move {
            let mut got = Vec::new();
            for _ in 0..1000 {
                if let Some(sample) = s.claim("qc").await {
                    got.push(sample);
                }
                tokio::task::yield_now().await;
            }
            got
        }
    });
    s.merge_steps(vec![Step::new("qc", &["align"])]).await?;

    let mut got = claimer.await?;
    while let Some(sample) = s.claim("qc").await {
        got.push(sample);
    }
    got.sort();
    let mut expected = ids.clone();
    expected.sort();
    assert_eq!(got, expected);
    Ok(())
}
