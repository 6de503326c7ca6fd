use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;

use serde::Deserialize;

use crate::types::Step;
use crate::{read_source, ConfigError};

#[derive(Debug, Deserialize)]
struct PipelineFile {
    pipeline: Vec<Step>,
}

/// Ordered, append-only list of pipeline steps.
///
/// Every upstream name refers to a step of the same pipeline and the
/// dependency graph is acyclic; both are checked whenever a pipeline is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    steps: Vec<Step>,
}

impl Pipeline {
    pub fn new(steps: Vec<Step>) -> Result<Self, ConfigError> {
        let steps = normalize(steps)?;
        validate_graph(&steps)?;
        Ok(Self { steps })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::parse(&read_source(path)?)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Self::new(parse_steps(text)?)
    }

    /// Re-reads `path` and appends every step not already defined.
    pub fn merge_from(&self, path: &Path) -> Result<(Pipeline, Vec<String>), ConfigError> {
        let incoming = parse_steps(&read_source(path)?)?;
        self.merge(incoming)
    }

    /// Appends the steps of `incoming` whose names are new, in source order.
    ///
    /// Existing steps are never redefined, even if `incoming` carries a
    /// different upstream list for them. Returns the merged pipeline together
    /// with the names that were added.
    pub fn merge(&self, incoming: Vec<Step>) -> Result<(Pipeline, Vec<String>), ConfigError> {
        let incoming = normalize(incoming)?;
        let mut steps = self.steps.clone();
        let mut added = Vec::new();
        for step in incoming {
            if self.contains(&step.name) {
                continue;
            }
            added.push(step.name.clone());
            steps.push(step);
        }
        validate_graph(&steps)?;
        Ok((Pipeline { steps }, added))
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.step(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

fn parse_steps(text: &str) -> Result<Vec<Step>, ConfigError> {
    let file: PipelineFile = serde_json::from_str(text)?;
    Ok(file.pipeline)
}

/// Trims names, drops duplicate upstream entries and rejects empty, repeated
/// or multi-cell step names. Names become column headers in the status
/// export, so tabs and line breaks are not allowed.
fn normalize(steps: Vec<Step>) -> Result<Vec<Step>, ConfigError> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(steps.len());
    for step in steps {
        let name = step.name.trim().to_string();
        if name.is_empty() {
            return Err(ConfigError::Invalid("step name must be non-empty".to_string()));
        }
        if name.contains(['\t', '\n', '\r']) {
            return Err(ConfigError::Invalid(format!(
                "step name {name:?} must not contain tabs or line breaks"
            )));
        }
        if !seen.insert(name.clone()) {
            return Err(ConfigError::Invalid(format!("step {name:?} defined twice")));
        }

        let mut upstream: Vec<String> = Vec::with_capacity(step.upstream.len());
        for u in step.upstream {
            let u = u.trim().to_string();
            if !upstream.contains(&u) {
                upstream.push(u);
            }
        }
        out.push(Step { name, upstream });
    }
    Ok(out)
}

fn validate_graph(steps: &[Step]) -> Result<(), ConfigError> {
    let names: BTreeSet<&str> = steps.iter().map(|s| s.name.as_str()).collect();
    for step in steps {
        for u in &step.upstream {
            if !names.contains(u.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "step {:?} depends on undefined step {u:?}",
                    step.name
                )));
            }
        }
    }

    // Kahn's algorithm: whatever never reaches in-degree zero sits on a cycle.
    let mut indegree: BTreeMap<&str, usize> = steps
        .iter()
        .map(|s| (s.name.as_str(), s.upstream.len()))
        .collect();
    let mut downstream: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for step in steps {
        for u in &step.upstream {
            downstream
                .entry(u.as_str())
                .or_default()
                .push(step.name.as_str());
        }
    }

    let mut ready: VecDeque<&str> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| *n)
        .collect();
    let mut visited = 0usize;
    while let Some(name) = ready.pop_front() {
        visited += 1;
        for next in downstream.get(name).into_iter().flatten() {
            if let Some(d) = indegree.get_mut(next) {
                *d -= 1;
                if *d == 0 {
                    ready.push_back(*next);
                }
            }
        }
    }

    if visited != steps.len() {
        let cyclic: Vec<&str> = indegree
            .iter()
            .filter(|(_, d)| **d > 0)
            .map(|(n, _)| *n)
            .collect();
        return Err(ConfigError::Invalid(format!(
            "dependency cycle among steps: {}",
            cyclic.join(", ")
        )));
    }
    Ok(())
}
