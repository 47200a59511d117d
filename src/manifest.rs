//! Manifest parsing
//!
//! A manifest is a YAML document dropped into the pickup directory:
//!
//! ```yaml
//! config:
//!   type: video          # "audio" or "video" (case-insensitive)
//!   subtitles: true      # video only
//!   rate_limit: 2M       # optional, applied to every item
//!   cookies: false       # hand the cookie file to the downloader
//! items:
//!   - urls: ["https://example.com/watch?v=1"]
//!   - urls: ["https://example.com/watch?v=2", "https://example.com/watch?v=3"]
//!     opts:
//!       - format: best
//! ```
//!
//! Unknown fields are ignored so that newer manifests still parse.

use crate::error::ManifestError;
use crate::options::OptionOverlay;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::warn;

/// What kind of media a manifest asks for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadMode {
    /// Best combined video and audio
    Video,
    /// Best audio-only stream, extracted at maximum quality
    Audio,
}

impl DownloadMode {
    /// Resolve a manifest `type` value
    ///
    /// Only `"audio"` (any case) selects [`DownloadMode::Audio`]. Anything
    /// else falls back to [`DownloadMode::Video`]; values other than
    /// `"video"` are logged because they are probably typos.
    pub fn from_type_field(value: &str) -> Self {
        let normalized = value.trim().to_lowercase();
        match normalized.as_str() {
            "audio" => DownloadMode::Audio,
            "video" => DownloadMode::Video,
            _ => {
                warn!(
                    value = %value,
                    "unrecognized manifest type, falling back to video"
                );
                DownloadMode::Video
            }
        }
    }
}

impl std::fmt::Display for DownloadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadMode::Video => write!(f, "video"),
            DownloadMode::Audio => write!(f, "audio"),
        }
    }
}

/// One group of URLs fetched together, with optional option overlays
#[derive(Clone, Debug, PartialEq)]
pub struct DownloadItem {
    /// Source URLs, in order
    pub urls: Vec<String>,
    /// Per-item overlays; `None` when absent or empty
    pub override_opts: Option<Vec<OptionOverlay>>,
}

/// A parsed job description
#[derive(Clone, Debug, PartialEq)]
pub struct Manifest {
    /// Video or audio
    pub mode: DownloadMode,
    /// Download items, processed in order (never empty)
    pub items: Vec<DownloadItem>,
    /// Request subtitles (video only)
    pub subtitles: bool,
    /// Rate limit specifier (e.g., "2M"), applied to every item
    pub rate_limit: Option<String>,
    /// Pass the cookie file to the downloader
    pub use_cookies: bool,
    /// Remux each video item into this container (e.g., "mkv")
    pub remux: Option<String>,
}

#[derive(Deserialize)]
struct RawManifest {
    config: Option<RawConfig>,
    items: Option<Vec<RawItem>>,
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    subtitles: Option<bool>,
    #[serde(default)]
    rate_limit: Option<Value>,
    #[serde(default)]
    cookies: Option<bool>,
    #[serde(default)]
    remux: Option<String>,
}

#[derive(Deserialize)]
struct RawItem {
    urls: Option<Vec<String>>,
    #[serde(default)]
    opts: Option<Vec<OptionOverlay>>,
}

/// Read and parse a manifest file
///
/// # Errors
/// Returns a [`ManifestError`] if the file cannot be read, is not valid
/// YAML, or lacks `config.type`, `items`, or an item's `urls`.
pub fn parse(path: &Path) -> Result<Manifest, ManifestError> {
    let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_str(&content)
}

/// Parse manifest content
pub fn parse_str(content: &str) -> Result<Manifest, ManifestError> {
    let raw: RawManifest = serde_yaml::from_str(content)?;

    let config = raw.config.ok_or_else(|| ManifestError::MissingField {
        field: "config".into(),
    })?;
    let kind = config.kind.ok_or_else(|| ManifestError::MissingField {
        field: "config.type".into(),
    })?;
    let raw_items = raw.items.ok_or_else(|| ManifestError::MissingField {
        field: "items".into(),
    })?;
    if raw_items.is_empty() {
        return Err(ManifestError::EmptyItems);
    }

    let items = raw_items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let urls = item
                .urls
                .filter(|urls| !urls.is_empty())
                .ok_or(ManifestError::ItemMissingUrls { index })?;
            Ok(DownloadItem {
                urls,
                override_opts: item.opts.filter(|opts| !opts.is_empty()),
            })
        })
        .collect::<Result<Vec<_>, ManifestError>>()?;

    let rate_limit = match config.rate_limit {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(other) => {
            return Err(ManifestError::InvalidField {
                field: "config.rate_limit".into(),
                reason: format!("expected a string or number, got {other}"),
            });
        }
    };

    Ok(Manifest {
        mode: DownloadMode::from_type_field(&kind),
        items,
        subtitles: config.subtitles.unwrap_or(false),
        rate_limit,
        use_cookies: config.cookies.unwrap_or(false),
        remux: config.remux.filter(|c| !c.trim().is_empty()),
    })
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const VIDEO_MANIFEST: &str = r#"
config:
  type: video
  subtitles: true
  rate_limit: 2M
  cookies: true
items:
  - urls: ["https://example.com/a"]
  - urls:
      - https://example.com/b
      - https://example.com/c
    opts:
      - format: best
        playlist_items: "1-2"
"#;

    #[test]
    fn parses_full_manifest() {
        let manifest = parse_str(VIDEO_MANIFEST).unwrap();

        assert_eq!(manifest.mode, DownloadMode::Video);
        assert!(manifest.subtitles);
        assert!(manifest.use_cookies);
        assert_eq!(manifest.rate_limit.as_deref(), Some("2M"));
        assert_eq!(manifest.items.len(), 2);
        assert_eq!(manifest.items[0].urls, vec!["https://example.com/a"]);
        assert!(manifest.items[0].override_opts.is_none());
        assert_eq!(manifest.items[1].urls.len(), 2);

        let overlays = manifest.items[1].override_opts.as_ref().unwrap();
        assert_eq!(overlays.len(), 1);
        assert_eq!(overlays[0]["format"], "best");
    }

    #[test]
    fn type_is_case_insensitive() {
        let manifest = parse_str("config: {type: AUDIO}\nitems: [{urls: [u1]}]").unwrap();
        assert_eq!(manifest.mode, DownloadMode::Audio);
    }

    #[test]
    fn unknown_type_falls_back_to_video() {
        let manifest = parse_str("config: {type: podcast}\nitems: [{urls: [u1]}]").unwrap();
        assert_eq!(manifest.mode, DownloadMode::Video);
    }

    #[test]
    fn optional_fields_default_to_off() {
        let manifest = parse_str("config: {type: video}\nitems: [{urls: [u1]}]").unwrap();
        assert!(!manifest.subtitles);
        assert!(!manifest.use_cookies);
        assert!(manifest.rate_limit.is_none());
        assert!(manifest.remux.is_none());
    }

    #[test]
    fn numeric_rate_limit_is_kept_as_string() {
        let manifest =
            parse_str("config: {type: video, rate_limit: 50000}\nitems: [{urls: [u1]}]").unwrap();
        assert_eq!(manifest.rate_limit.as_deref(), Some("50000"));
    }

    #[test]
    fn missing_items_is_rejected() {
        let err = parse_str("config: {type: video}").unwrap_err();
        assert!(
            matches!(err, ManifestError::MissingField { ref field } if field == "items"),
            "got {err:?}"
        );
    }

    #[test]
    fn missing_type_is_rejected() {
        let err = parse_str("config: {subtitles: true}\nitems: [{urls: [u1]}]").unwrap_err();
        assert!(matches!(err, ManifestError::MissingField { ref field } if field == "config.type"));
    }

    #[test]
    fn empty_items_are_rejected() {
        let err = parse_str("config: {type: video}\nitems: []").unwrap_err();
        assert!(matches!(err, ManifestError::EmptyItems));
    }

    #[test]
    fn item_without_urls_reports_its_index() {
        let err =
            parse_str("config: {type: video}\nitems: [{urls: [u1]}, {opts: []}]").unwrap_err();
        assert!(matches!(err, ManifestError::ItemMissingUrls { index: 1 }));
    }

    #[test]
    fn invalid_yaml_is_rejected() {
        let err = parse_str("config: [unclosed").unwrap_err();
        assert!(matches!(err, ManifestError::Yaml(_)));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let manifest = parse_str(
            "version: 3\nconfig: {type: video, priority: high}\nitems: [{urls: [u1], note: x}]",
        )
        .unwrap();
        assert_eq!(manifest.items.len(), 1);
    }

    #[test]
    fn empty_opts_list_means_no_overrides() {
        let manifest = parse_str("config: {type: video}\nitems: [{urls: [u1], opts: []}]").unwrap();
        assert!(manifest.items[0].override_opts.is_none());
    }

    #[test]
    fn parsing_is_idempotent() {
        assert_eq!(
            parse_str(VIDEO_MANIFEST).unwrap(),
            parse_str(VIDEO_MANIFEST).unwrap()
        );
    }

    #[test]
    fn parse_reads_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("job.yaml");
        std::fs::write(&path, VIDEO_MANIFEST).unwrap();
        assert_eq!(parse(&path).unwrap(), parse_str(VIDEO_MANIFEST).unwrap());

        let err = parse(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, ManifestError::Io { .. }));
    }
}
