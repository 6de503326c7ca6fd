use std::collections::BTreeMap;

use alpaca_core::Status;
use tokio::sync::{Mutex, MutexGuard};

pub(crate) type Statuses = BTreeMap<String, Status>;

/// One sample's statuses. The mutex is the sample's exclusive section.
#[derive(Debug)]
pub(crate) struct SampleRow {
    id: String,
    statuses: Mutex<Statuses>,
}

impl SampleRow {
    pub(crate) fn new(id: &str, steps: &[String]) -> Self {
        Self {
            id: id.to_string(),
            statuses: Mutex::new(
                steps
                    .iter()
                    .map(|s| (s.clone(), Status::Unprocessed))
                    .collect(),
            ),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Statuses> {
        self.statuses.lock().await
    }
}

/// `step` is still `UNPROCESSED` and every upstream step is `COMPLETE`.
pub(crate) fn is_ready(statuses: &Statuses, step: &str, upstream: &[String]) -> bool {
    statuses.get(step) == Some(&Status::Unprocessed)
        && upstream
            .iter()
            .all(|u| statuses.get(u) == Some(&Status::Complete))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statuses(pairs: &[(&str, Status)]) -> Statuses {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn root_step_is_ready_when_unprocessed() {
        let s = statuses(&[("align", Status::Unprocessed)]);
        assert!(is_ready(&s, "align", &[]));
    }

    #[test]
    fn claimed_or_finished_step_is_not_ready() {
        for status in [
            Status::Distributed,
            Status::Complete,
            Status::Error,
            Status::Abandoned,
        ] {
            let s = statuses(&[("align", status)]);
            assert!(!is_ready(&s, "align", &[]), "{status}");
        }
    }

    #[test]
    fn every_upstream_must_be_complete() {
        let upstream = vec!["a".to_string(), "b".to_string()];
        let s = statuses(&[
            ("a", Status::Complete),
            ("b", Status::Error),
            ("c", Status::Unprocessed),
        ]);
        assert!(!is_ready(&s, "c", &upstream));

        let s = statuses(&[
            ("a", Status::Complete),
            ("b", Status::Complete),
            ("c", Status::Unprocessed),
        ]);
        assert!(is_ready(&s, "c", &upstream));
    }

    #[test]
    fn missing_upstream_entry_is_not_ready() {
        let s = statuses(&[("c", Status::Unprocessed)]);
        assert!(!is_ready(&s, "c", &["ghost".to_string()]));
    }
}
