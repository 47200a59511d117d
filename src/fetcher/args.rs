//! Rendering of download options as yt-dlp command-line flags

use crate::options::DownloadOptions;
use serde_json::Value;

/// Postprocessor key that extracts the audio track
pub const EXTRACT_AUDIO_POSTPROCESSOR: &str = "FFmpegExtractAudio";

/// Render an option map as yt-dlp arguments, in option order
///
/// Well-known keys map to their yt-dlp flags. Any other key is rendered
/// generically: `snake_case` becomes `--kebab-case`, `true` is a bare flag,
/// `false` becomes `--no-<key>`, scalars become `--key value`, and arrays
/// repeat the flag per element. `null` values are skipped.
pub fn to_ytdlp_args(options: &DownloadOptions) -> Vec<String> {
    let mut args = Vec::new();

    for (key, value) in options.iter() {
        match key.as_str() {
            "format" => push_valued(&mut args, "-f", value),
            "outtmpl" => push_valued(&mut args, "-o", value),
            "ratelimit" => push_valued(&mut args, "--limit-rate", value),
            "cookiefile" => push_valued(&mut args, "--cookies", value),
            "subtitlesformat" => push_valued(&mut args, "--sub-format", value),
            "writesubtitles" => push_toggle(&mut args, "--write-subs", "--no-write-subs", value),
            "writeautomaticsub" => {
                push_toggle(&mut args, "--write-auto-subs", "--no-write-auto-subs", value)
            }
            "verbose" => {
                if value.as_bool() == Some(true) {
                    args.push("--verbose".to_string());
                }
            }
            "ignoreerrors" => {
                push_toggle(&mut args, "--ignore-errors", "--abort-on-error", value)
            }
            "postprocessors" => push_postprocessors(&mut args, value),
            other => push_generic(&mut args, other, value),
        }
    }

    args
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn push_valued(args: &mut Vec<String>, flag: &str, value: &Value) {
    match scalar_to_string(value) {
        Some(v) => {
            args.push(flag.to_string());
            args.push(v);
        }
        None if value.is_null() => {}
        None => tracing::warn!(flag = flag, value = %value, "ignoring non-scalar option value"),
    }
}

fn push_toggle(args: &mut Vec<String>, on: &str, off: &str, value: &Value) {
    match value.as_bool() {
        Some(true) => args.push(on.to_string()),
        Some(false) => args.push(off.to_string()),
        None => tracing::warn!(flag = on, value = %value, "ignoring non-boolean option value"),
    }
}

fn push_postprocessors(args: &mut Vec<String>, value: &Value) {
    let Some(list) = value.as_array() else {
        tracing::warn!(value = %value, "postprocessors must be a list, ignoring");
        return;
    };

    for entry in list {
        let key = entry.get("key").and_then(Value::as_str);
        match key {
            Some(EXTRACT_AUDIO_POSTPROCESSOR) => {
                args.push("-x".to_string());
                if let Some(quality) = entry.get("preferredquality").and_then(scalar_to_string) {
                    args.push("--audio-quality".to_string());
                    args.push(quality);
                }
                if let Some(codec) = entry.get("preferredcodec").and_then(scalar_to_string) {
                    args.push("--audio-format".to_string());
                    args.push(codec);
                }
            }
            other => {
                tracing::warn!(postprocessor = ?other, "unsupported postprocessor, ignoring");
            }
        }
    }
}

fn push_generic(args: &mut Vec<String>, key: &str, value: &Value) {
    let name = key.replace('_', "-");
    match value {
        Value::Null => {}
        Value::Bool(true) => args.push(format!("--{name}")),
        Value::Bool(false) => args.push(format!("--no-{name}")),
        Value::String(_) | Value::Number(_) => push_valued(args, &format!("--{name}"), value),
        Value::Array(items) => {
            for item in items {
                push_valued(args, &format!("--{name}"), item);
            }
        }
        Value::Object(_) => {
            tracing::warn!(option = key, "nested option maps have no flag form, ignoring");
        }
    }
}
