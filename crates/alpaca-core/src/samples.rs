use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::{read_source, ConfigError};

/// Named metadata values of one sample. Field order lives in
/// [`SampleRegistry::fields`].
pub type Metadata = BTreeMap<String, String>;

/// Registration-ordered sample identifiers plus optional per-sample metadata.
///
/// Source format (TSV):
///   header line: `sample[<TAB>field]*`
///   then one row per sample with the same number of columns.
///
/// A single-column header means the list carries no metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleRegistry {
    samples: Vec<String>,
    metadata: BTreeMap<String, Metadata>,
    fields: Vec<String>,
}

impl SampleRegistry {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::parse(&read_source(path)?)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, raw)| (i + 1, raw.trim_end_matches('\r')))
            .filter(|(_, line)| !line.trim().is_empty());

        let Some((header_line, header)) = lines.next() else {
            return Ok(Self::default());
        };
        let header: Vec<&str> = header.split('\t').map(str::trim).collect();
        let fields: Vec<String> = header.iter().skip(1).map(|f| f.to_string()).collect();

        let mut seen_fields = BTreeSet::new();
        for field in &fields {
            if field.is_empty() {
                return Err(ConfigError::Parse {
                    line: header_line,
                    message: "metadata field names must be non-empty".to_string(),
                });
            }
            if !seen_fields.insert(field.as_str()) {
                return Err(ConfigError::Parse {
                    line: header_line,
                    message: format!("metadata field {field:?} appears twice"),
                });
            }
        }

        let mut registry = Self {
            samples: Vec::new(),
            metadata: BTreeMap::new(),
            fields,
        };
        for (line_no, line) in lines {
            let cols: Vec<&str> = line.split('\t').map(str::trim).collect();
            if cols.len() != header.len() {
                return Err(ConfigError::Parse {
                    line: line_no,
                    message: format!(
                        "expected {} columns (as in header) but found {}",
                        header.len(),
                        cols.len()
                    ),
                });
            }

            let id = cols[0];
            if id.is_empty() {
                return Err(ConfigError::Parse {
                    line: line_no,
                    message: "sample identifier must be non-empty".to_string(),
                });
            }
            if registry.contains(id) {
                return Err(ConfigError::Parse {
                    line: line_no,
                    message: format!("sample {id:?} listed twice"),
                });
            }

            let record: Metadata = registry
                .fields
                .iter()
                .cloned()
                .zip(cols[1..].iter().map(|v| v.to_string()))
                .collect();
            registry.samples.push(id.to_string());
            registry.metadata.insert(id.to_string(), record);
        }
        Ok(registry)
    }

    /// Re-reads `path` and appends every sample not already registered.
    pub fn merge_from(&self, path: &Path) -> Result<(SampleRegistry, Vec<String>), ConfigError> {
        let incoming = Self::load(path)?;
        Ok(self.merge(&incoming))
    }

    /// Additive merge.
    ///
    /// New samples are appended in `incoming` order. Fields first seen in
    /// `incoming` are appended to the field list and filled in for existing
    /// samples that `incoming` also lists. Values already held for known
    /// (sample, field) pairs are never overwritten.
    pub fn merge(&self, incoming: &SampleRegistry) -> (SampleRegistry, Vec<String>) {
        let mut merged = self.clone();

        let new_fields: Vec<String> = incoming
            .fields
            .iter()
            .filter(|f| !self.fields.contains(f))
            .cloned()
            .collect();
        merged.fields.extend(new_fields.iter().cloned());

        if !new_fields.is_empty() {
            for id in &self.samples {
                let Some(source) = incoming.metadata.get(id) else {
                    continue;
                };
                let record = merged.metadata.entry(id.clone()).or_default();
                for field in &new_fields {
                    if let Some(value) = source.get(field) {
                        record.insert(field.clone(), value.clone());
                    }
                }
            }
        }

        let mut added = Vec::new();
        for id in &incoming.samples {
            if self.contains(id) {
                continue;
            }
            let record = incoming.metadata.get(id).cloned().unwrap_or_default();
            merged.samples.push(id.clone());
            merged.metadata.insert(id.clone(), record);
            added.push(id.clone());
        }
        (merged, added)
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn metadata(&self, id: &str) -> Option<&Metadata> {
        self.metadata.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.metadata.contains_key(id)
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }

    /// Values of `fields` for sample `id`, in request order. Missing values
    /// come back as empty strings.
    pub fn field_values(&self, id: &str, fields: &[String]) -> Vec<String> {
        let record = self.metadata.get(id);
        fields
            .iter()
            .map(|f| {
                record
                    .and_then(|r| r.get(f))
                    .cloned()
                    .unwrap_or_default()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
