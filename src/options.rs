//! Ordered download option map and per-item overlay rules
//!
//! Options use the key names of yt-dlp's embedding API (`format`, `outtmpl`,
//! `ratelimit`, ...). Insertion order is preserved so that positional
//! overlays pair against a stable sequence of entries.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// One per-item option overlay, as written under `opts:` in a manifest
pub type OptionOverlay = Map<String, Value>;

/// How a download item's overlays combine with the job's option set
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayMode {
    /// Pair the i-th base entry with the i-th overlay (default)
    ///
    /// Only the first `min(entries, overlays)` base entries survive. Paired
    /// overlays are then applied in order, key by key. Extra entries on
    /// either side are dropped.
    #[default]
    Positional,
    /// Apply every overlay on top of the full option set, key by key
    ByKey,
}

/// Ordered option map handed to the download collaborator
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadOptions(Map<String, Value>);

impl DownloadOptions {
    /// Create an empty option set
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Insert or replace an option, keeping its original position on replace
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up an option
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Look up a string option
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Whether an option is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterate over options in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of options
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no options are set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolve the option set for one download item
    ///
    /// An empty `overlays` slice returns the set unchanged in either mode.
    pub fn with_overlays(&self, overlays: &[OptionOverlay], mode: OverlayMode) -> Self {
        if overlays.is_empty() {
            return self.clone();
        }

        match mode {
            OverlayMode::Positional => {
                let paired = self.0.len().min(overlays.len());
                if paired < self.0.len() || paired < overlays.len() {
                    warn!(
                        base_entries = self.0.len(),
                        overlays = overlays.len(),
                        kept = paired,
                        "positional option overlay truncated to the shorter sequence"
                    );
                }

                let mut resolved: Map<String, Value> = self
                    .0
                    .iter()
                    .take(paired)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                for overlay in &overlays[..paired] {
                    apply(&mut resolved, overlay);
                }

                Self(resolved)
            }
            OverlayMode::ByKey => {
                let mut resolved = self.0.clone();
                for overlay in overlays {
                    apply(&mut resolved, overlay);
                }
                Self(resolved)
            }
        }
    }
}

fn apply(target: &mut Map<String, Value>, overlay: &OptionOverlay) {
    for (key, value) in overlay {
        target.insert(key.clone(), value.clone());
    }
}

impl FromIterator<(String, Value)> for DownloadOptions {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
