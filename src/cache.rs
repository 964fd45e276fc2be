use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Question text -> answer previously given, backed by a flat JSON object.
#[derive(Debug)]
pub struct AnswerCache {
    path: PathBuf,
    entries: BTreeMap<String, String>,
    dirty: bool,
}

impl AnswerCache {
    /// A missing or blank file is an empty cache, not an error.
    pub fn load(path: &Path) -> Result<Self> {
        let entries = match std::fs::read_to_string(path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse answer cache {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Answer cache not found, starting empty");
                BTreeMap::new()
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read answer cache {}", path.display()));
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries,
            dirty: false,
        })
    }

    pub fn get(&self, question: &str) -> Option<&str> {
        self.entries.get(question).map(String::as_str)
    }

    pub fn put(&mut self, question: &str, answer: &str) {
        let changed = self.entries.get(question).map(String::as_str) != Some(answer);
        if changed {
            self.entries.insert(question.to_string(), answer.to_string());
            self.dirty = true;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write answer cache {}", self.path.display()))?;
        tracing::debug!(entries = self.entries.len(), "Answer cache saved");
        self.dirty = false;
        Ok(())
    }
}
