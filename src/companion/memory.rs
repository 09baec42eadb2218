//! # Memory
//!
//! The avatar's "memory" is one opaque string. It is loaded once when the
//! backend starts, embedded in every session instruction and overwritten
//! after any avatar utterance longer than [`MEMORY_MIN_CHARS`] characters.
//!
//! ## Storage:
//! A TOML file with a single key:
//! ```toml
//! azumi_memoria = "He aprendido que ..."
//! ```

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

/// Utterances must be strictly longer than this (in characters) to be remembered.
pub const MEMORY_MIN_CHARS: usize = 30;

/// Characters of the utterance embedded in the memory string.
pub const MEMORY_EXCERPT_CHARS: usize = 40;

/// New memory string for an avatar utterance, if it qualifies.
pub fn derive_memory(utterance: &str) -> Option<String> {
    if utterance.chars().count() <= MEMORY_MIN_CHARS {
        return None;
    }
    let excerpt: String = utterance.chars().take(MEMORY_EXCERPT_CHARS).collect();
    Some(format!(
        "He aprendido que el usuario es amable y hablamos sobre temas importantes como: {}... mi cariño por él crece.",
        excerpt
    ))
}

/// Persistence for the memory string.
pub trait MemoryStore: Send {
    /// Stored value, `None` when nothing was saved yet.
    fn load(&self) -> AppResult<Option<String>>;

    fn save(&mut self, memory: &str) -> AppResult<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryFile {
    #[serde(default, rename = "azumi_memoria")]
    memory: Option<String>,
}

/// TOML-file backed store.
#[derive(Debug, Clone)]
pub struct FileMemoryStore {
    path: PathBuf,
}

impl FileMemoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MemoryStore for FileMemoryStore {
    fn load(&self) -> AppResult<Option<String>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No memory file yet");
            return Ok(None);
        }

        let raw = fs::read_to_string(&self.path)?;
        let file: MemoryFile = toml::from_str(&raw)?;
        let memory = file.memory.filter(|m| !m.is_empty());

        info!(
            path = %self.path.display(),
            present = memory.is_some(),
            "Loaded memory"
        );
        Ok(memory)
    }

    fn save(&mut self, memory: &str) -> AppResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string(&MemoryFile {
            memory: Some(memory.to_string()),
        })?;

        // Write next to the target and rename so a crash never leaves half a file.
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            AppError::Storage(format!("cannot replace {}: {}", self.path.display(), e))
        })?;

        debug!(path = %self.path.display(), chars = memory.chars().count(), "Memory saved");
        Ok(())
    }
}

/// Volatile store, shared between clones.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    value: std::sync::Arc<std::sync::Mutex<Option<String>>>,
}

#[cfg(test)]
impl InMemoryStore {
    pub fn new(initial: Option<String>) -> Self {
        Self {
            value: std::sync::Arc::new(std::sync::Mutex::new(initial)),
        }
    }

    pub fn get(&self) -> Option<String> {
        self.value.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl MemoryStore for InMemoryStore {
    fn load(&self) -> AppResult<Option<String>> {
        Ok(self.get())
    }

    fn save(&mut self, memory: &str) -> AppResult<()> {
        *self.value.lock().unwrap() = Some(memory.to_string());
        Ok(())
    }
}
