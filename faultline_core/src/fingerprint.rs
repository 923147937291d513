use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;

fn timestamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?Z?")
            .unwrap_or_else(|e| panic!("invalid timestamp pattern: {e}"))
    })
}

fn hex_address_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"0x[0-9a-fA-F]+")
            .unwrap_or_else(|e| panic!("invalid address pattern: {e}"))
    })
}

fn file_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:[A-Za-z]:)?(?:[\w.\-]+[/\\])+([\w.\-]+)")
            .unwrap_or_else(|e| panic!("invalid path pattern: {e}"))
    })
}

fn line_col_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b\d+:\d+\b").unwrap_or_else(|e| panic!("invalid line:col pattern: {e}"))
    })
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\s+").unwrap_or_else(|e| panic!("invalid whitespace pattern: {e}"))
    })
}

fn error_class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([A-Z][A-Za-z]*Error)\b")
            .unwrap_or_else(|e| panic!("invalid error class pattern: {e}"))
    })
}

/// Strips the run-to-run noise out of a stack trace so two occurrences of
/// the same bug hash identically: timestamps, heap addresses, absolute
/// paths, and line:column positions all collapse to placeholders.
///
/// Timestamps must go first; their `HH:MM:SS` tail would otherwise be eaten
/// by the line:column rewrite.
pub fn normalize_stack_trace(trace: &str) -> String {
    let s = timestamp_re().replace_all(trace, "TS");
    let s = hex_address_re().replace_all(&s, "0xADDR");
    let s = file_path_re().replace_all(&s, "$1");
    let s = line_col_re().replace_all(&s, "L:C");
    let s = whitespace_re().replace_all(&s, " ");
    s.trim().to_string()
}

/// Extracts the dominant failure signal from a trace: fatal signals first,
/// then a named error class, then a generic error marker.
pub fn extract_signal(trace: &str) -> String {
    let lowered = trace.to_lowercase();
    if lowered.contains("sigsegv") || lowered.contains("segmentation fault") {
        return "SIGSEGV".to_string();
    }
    if lowered.contains("sigabrt") || lowered.contains("abort") {
        return "SIGABRT".to_string();
    }
    if lowered.contains("sigfpe") {
        return "SIGFPE".to_string();
    }
    if lowered.contains("sigill") {
        return "SIGILL".to_string();
    }
    if let Some(captures) = error_class_re().captures(trace) {
        return captures[1].to_string();
    }
    if lowered.contains("error") {
        return "Error".to_string();
    }
    "UNKNOWN".to_string()
}

/// Stable identity of a crash, built from the normalized stack, the failure
/// signal, and a hash of the coverage set at the time of the crash.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CrashFingerprint {
    pub stack_hash: String,
    pub signal: String,
    pub coverage_hash: String,
    /// Combined digest; the deduplication key.
    pub hash: String,
}

/// Sentinel used when a crash carries no coverage information, so that
/// coverage-blind crashes still group together.
const NO_COVERAGE: &str = "no-coverage";

impl CrashFingerprint {
    pub fn new(stack_trace: &str, coverage: Option<&BTreeSet<u32>>) -> Self {
        let normalized = normalize_stack_trace(stack_trace);
        let stack_hash = format!("{:x}", md5::compute(normalized.as_bytes()));
        let signal = extract_signal(stack_trace);
        let coverage_hash = match coverage {
            Some(units) if !units.is_empty() => {
                let joined = units
                    .iter()
                    .map(|u| u.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                format!("{:x}", md5::compute(joined.as_bytes()))
            }
            _ => NO_COVERAGE.to_string(),
        };
        let hash = format!(
            "{:x}",
            md5::compute(format!("{stack_hash}-{signal}-{coverage_hash}").as_bytes())
        );
        CrashFingerprint {
            stack_hash,
            signal,
            coverage_hash,
            hash,
        }
    }
}
