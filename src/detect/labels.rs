use anyhow::{anyhow, Context, Result};
use std::path::Path;

/// Class-index to label lookup, one label per line.
#[derive(Clone, Debug, Default)]
pub struct LabelMap {
    labels: Vec<String>,
}

impl LabelMap {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read label map {}", path.display()))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let labels: Vec<String> = raw.lines().map(|line| line.trim().to_string()).collect();
        if labels.iter().all(|label| label.is_empty()) {
            return Err(anyhow!("label map is empty"));
        }
        Ok(Self { labels })
    }

    /// Label for a class index. Blank lines and the `???` placeholder map to `None`.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels
            .get(index)
            .map(String::as_str)
            .filter(|label| !label.is_empty() && *label != "???")
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
