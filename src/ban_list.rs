// =============================================================================
// Ban List — persistent symbol → unban-timestamp map
// =============================================================================
//
// Owned exclusively by the engine loop (§5: the symbol→slot mapping and its
// surrounding bookkeeping are never concurrently mutated), so this carries no
// internal lock of its own. Persistence follows the same atomic
// write-to-temp-then-rename scheme as `config::RuntimeConfig`.
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

pub struct BanList {
    path: PathBuf,
    entries: HashMap<String, i64>,
}

impl BanList {
    /// Load the ban list from `path`, or start empty if the file is absent.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(error = %e, path = %path.display(), "ban list corrupt, starting empty");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        info!(path = %path.display(), count = entries.len(), "ban list loaded");
        Self { path, entries }
    }

    fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.entries)
            .context("failed to serialize ban list")?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp ban list to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to rename tmp ban list to {}", self.path.display()))?;
        Ok(())
    }

    /// Decide whether `symbol` may be (re)subscribed at `now`. If it is
    /// banned with an expired ban, the entry is removed and persisted before
    /// returning `true`. If banned with an active ban, returns `false`
    /// without creating a slot.
    pub fn check_on_subscribe(&mut self, symbol: &str, now: i64) -> bool {
        match self.entries.get(symbol).copied() {
            Some(unban_ms) if unban_ms > now => false,
            Some(_) => {
                self.entries.remove(symbol);
                if let Err(e) = self.save() {
                    warn!(error = %e, symbol, "failed to persist ban list after unban");
                }
                true
            }
            None => true,
        }
    }

    /// Apply a ban to `symbol` starting at `now` for `duration_ms`, persisting
    /// immediately.
    pub fn apply_ban(&mut self, symbol: &str, now: i64, duration_ms: i64) {
        self.entries.insert(symbol.to_string(), now + duration_ms);
        if let Err(e) = self.save() {
            warn!(error = %e, symbol, "failed to persist ban list after ban");
        }
    }

    pub fn is_banned(&self, symbol: &str, now: i64) -> bool {
        self.entries.get(symbol).is_some_and(|&unban_ms| unban_ms > now)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
