use crate::input::canonical_bytes;
use crate::triage::CrashInfo;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Cap on reproduction attempts per minimization run. Each attempt re-executes
/// the target, so this bounds wall-clock cost on stubborn inputs.
pub const DEFAULT_MAX_ITERATIONS: u32 = 100;

/// Heuristic explanation of why a crash happened.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RootCause {
    pub likely_cause: String,
    /// Variable names implicated by the trace.
    pub suspect_vars: Vec<String>,
    /// Input fields present in the crashing input.
    pub mutated_fields: Vec<String>,
    /// 0-100; how specific the matched failure pattern is.
    pub confidence: u8,
}

/// A crash input reduced to (a local approximation of) its essential bytes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MinimizedCrash {
    pub original: CrashInfo,
    pub minimized_input: Vec<u8>,
    pub reduction_percent: f64,
    /// Reproduction attempts actually spent.
    pub iterations: u32,
    pub root_cause: RootCause,
}

fn quoted_ident_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"['"`]([A-Za-z_][A-Za-z0-9_]*)['"`]"#)
            .unwrap_or_else(|e| panic!("invalid identifier pattern: {e}"))
    })
}

fn frame_function_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // "at name (", "in name", "name@" frame shapes.
        Regex::new(r"(?:\bat\s+([A-Za-z_$][\w$.]*)\s*\(|\bin\s+([A-Za-z_$][\w$.]*)\b|([A-Za-z_$][\w$.]*)@)")
            .unwrap_or_else(|e| panic!("invalid frame pattern: {e}"))
    })
}

/// Names the web-shaped inputs worth flagging even when the trace does not
/// quote them explicitly.
const VAR_WATCHLIST: &[&str] = &[
    "request", "body", "params", "query", "input", "data", "payload", "user", "token", "id",
    "headers",
];

/// Failure families checked in order; the first match names the cause. More
/// specific text patterns sit above generic ones so "null index" reads as a
/// null dereference, not a bounds bug.
const CAUSE_PATTERNS: &[(&[&str], &str, u8)] = &[
    (&["null", "undefined"], "null or undefined dereference", 90),
    (&["index", "bounds", "length"], "out-of-bounds access", 85),
    (&["parse", "json", "xml"], "malformed input mishandled by parser", 80),
    (&["type", "cast", "convert"], "type confusion", 75),
    (&["overflow", "buffer"], "buffer or arithmetic overflow", 95),
    (&["auth", "permission", "access"], "access control failure", 70),
];

fn suspect_vars(trace: &str) -> Vec<String> {
    let lowered = trace.to_lowercase();
    let mut vars: Vec<String> = quoted_ident_re()
        .captures_iter(trace)
        .map(|c| c[1].to_string())
        .collect();
    for candidate in VAR_WATCHLIST {
        if lowered.contains(candidate) {
            vars.push((*candidate).to_string());
        }
    }
    vars.sort();
    vars.dedup();
    vars
}

fn json_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""(\w+)"\s*:"#).unwrap_or_else(|e| panic!("invalid key pattern: {e}"))
    })
}

fn mutated_fields(crash: &CrashInfo) -> Vec<String> {
    if !crash.mutated_fields.is_empty() {
        return crash.mutated_fields.clone();
    }
    if let Some(map) = crash.input.as_object() {
        return map.keys().cloned().collect();
    }
    // String inputs may carry an embedded structured document; parse it as
    // one, or fall back to scanning for key-shaped text.
    if let Some(text) = crash.input.as_str() {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(text) {
            return map.keys().cloned().collect();
        }
        let mut keys: Vec<String> = json_key_re()
            .captures_iter(text)
            .map(|c| c[1].to_string())
            .collect();
        keys.sort();
        keys.dedup();
        return keys;
    }
    Vec::new()
}

/// Pattern-matches the stack trace against known failure families. Falls
/// back to naming the innermost frame, then to an unclassified verdict.
pub fn analyze_root_cause(crash: &CrashInfo) -> RootCause {
    let lowered = crash.stack_trace.to_lowercase();
    let suspect_vars = suspect_vars(&crash.stack_trace);
    let mutated_fields = mutated_fields(crash);

    for (keywords, cause, confidence) in CAUSE_PATTERNS {
        if keywords.iter().any(|kw| lowered.contains(kw)) {
            return RootCause {
                likely_cause: (*cause).to_string(),
                suspect_vars,
                mutated_fields,
                confidence: *confidence,
            };
        }
    }

    if let Some(captures) = frame_function_re().captures(&crash.stack_trace) {
        let function = captures
            .get(1)
            .or_else(|| captures.get(2))
            .or_else(|| captures.get(3))
            .map(|m| m.as_str())
            .unwrap_or("unknown");
        return RootCause {
            likely_cause: format!("failure inside '{function}'"),
            suspect_vars,
            mutated_fields,
            confidence: 60,
        };
    }

    RootCause {
        likely_cause: "unclassified failure".to_string(),
        suspect_vars,
        mutated_fields,
        confidence: 40,
    }
}

/// Delta-debugging reduction of a crashing input.
///
/// Works on the canonical byte rendering of the crash input: chunks of
/// decreasing size are deleted, and any deletion that still reproduces the
/// crash (per `test_fn`) becomes the new baseline. Stops at a local minimum,
/// a single byte, or the iteration budget. The result is not guaranteed to
/// be globally minimal, only that no single remaining chunk at the final
/// granularity can be dropped.
pub fn minimize<F>(crash: &CrashInfo, mut test_fn: F, max_iterations: u32) -> MinimizedCrash
where
    F: FnMut(&[u8]) -> bool,
{
    let original_bytes = canonical_bytes(&crash.input);
    let mut current = original_bytes.clone();
    let mut iterations = 0u32;
    let mut chunk = (current.len() / 2).max(1);

    'outer: while current.len() > 1 && iterations < max_iterations {
        let mut offset = 0;
        while offset < current.len() {
            if iterations >= max_iterations {
                break 'outer;
            }
            let end = (offset + chunk).min(current.len());
            let mut candidate = Vec::with_capacity(current.len() - (end - offset));
            candidate.extend_from_slice(&current[..offset]);
            candidate.extend_from_slice(&current[end..]);
            iterations += 1;
            if !candidate.is_empty() && test_fn(&candidate) {
                current = candidate;
                chunk = (current.len() / 2).max(1);
                continue 'outer;
            }
            offset += chunk;
        }
        if chunk == 1 {
            break;
        }
        chunk = (chunk / 2).max(1);
    }

    let reduction_percent = if original_bytes.is_empty() {
        0.0
    } else {
        (original_bytes.len() - current.len()) as f64 * 100.0 / original_bytes.len() as f64
    };
    log::debug!(
        "minimized {} -> {} bytes in {} attempts",
        original_bytes.len(),
        current.len(),
        iterations
    );

    MinimizedCrash {
        original: crash.clone(),
        minimized_input: current,
        reduction_percent,
        iterations,
        root_cause: analyze_root_cause(crash),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::now_ms;
    use serde_json::{Value, json};

    fn crash(trace: &str, input: Value) -> CrashInfo {
        CrashInfo {
            timestamp_ms: now_ms(),
            signal: None,
            stack_trace: trace.to_string(),
            input,
            coverage: None,
            tainted_vars: Vec::new(),
            mutated_fields: Vec::new(),
        }
    }

    #[test]
    fn result_never_grows_and_still_reproduces() {
        let info = crash("Error: boom", json!("aaaaaaaaaaXaaaaaaaaaa"));
        let reproduces = |bytes: &[u8]| bytes.contains(&b'X');
        let minimized = minimize(&info, reproduces, DEFAULT_MAX_ITERATIONS);

        let original_len = canonical_bytes(&info.input).len();
        assert!(minimized.minimized_input.len() <= original_len);
        assert!(reproduces(&minimized.minimized_input));
        assert!(minimized.reduction_percent > 50.0);
    }

    #[test]
    fn local_minimum_cannot_drop_any_single_byte() {
        let info = crash("Error: boom", json!("padXpadYpad"));
        let reproduces = |bytes: &[u8]| bytes.contains(&b'X') && bytes.contains(&b'Y');
        let minimized = minimize(&info, reproduces, 1000);

        for i in 0..minimized.minimized_input.len() {
            let mut shorter = minimized.minimized_input.clone();
            shorter.remove(i);
            assert!(
                shorter.is_empty() || !reproduces(&shorter),
                "byte {i} was removable"
            );
        }
    }

    #[test]
    fn already_minimal_input_reduces_nothing() {
        let info = crash("Error: boom", json!(7));
        let minimized = minimize(&info, |bytes| !bytes.is_empty(), DEFAULT_MAX_ITERATIONS);
        assert_eq!(minimized.minimized_input, b"7".to_vec());
        assert_eq!(minimized.reduction_percent, 0.0);
    }

    #[test]
    fn iteration_budget_is_honored() {
        let info = crash("Error: boom", json!("a".repeat(500)));
        let minimized = minimize(&info, |_| true, 10);
        assert!(minimized.iterations <= 10);
    }

    #[test]
    fn root_cause_families_match_in_order() {
        let cases = [
            ("TypeError: cannot read 'x' of undefined", "null or undefined dereference", 90),
            ("RangeError: index 9 out of bounds", "out-of-bounds access", 85),
            ("SyntaxError: unexpected token in JSON", "malformed input mishandled by parser", 80),
            ("cannot convert string to int", "type confusion", 75),
            ("buffer write past end", "buffer or arithmetic overflow", 95),
            ("permission denied for role", "access control failure", 70),
        ];
        for (trace, cause, confidence) in cases {
            let rc = analyze_root_cause(&crash(trace, json!(null)));
            assert_eq!(rc.likely_cause, cause, "trace: {trace}");
            assert_eq!(rc.confidence, confidence, "trace: {trace}");
        }
    }

    #[test]
    fn unmatched_trace_falls_back_to_the_failing_frame() {
        let rc = analyze_root_cause(&crash("fatal\n    at handleUpload (app.js)", json!(null)));
        assert_eq!(rc.likely_cause, "failure inside 'handleUpload'");
        assert_eq!(rc.confidence, 60);

        let rc = analyze_root_cause(&crash("something odd happened", json!(null)));
        assert_eq!(rc.likely_cause, "unclassified failure");
        assert_eq!(rc.confidence, 40);
    }

    #[test]
    fn suspect_vars_merge_quoted_names_and_watchlist_hits() {
        let rc = analyze_root_cause(&crash(
            "TypeError: cannot read 'userName' of undefined while handling request body",
            json!(null),
        ));
        assert!(rc.suspect_vars.contains(&"userName".to_string()));
        assert!(rc.suspect_vars.contains(&"request".to_string()));
        assert!(rc.suspect_vars.contains(&"body".to_string()));
    }

    #[test]
    fn mutated_fields_come_from_the_input_object() {
        let rc = analyze_root_cause(&crash("Error: e", json!({"name": "x", "age": 3})));
        assert_eq!(rc.mutated_fields, vec!["age".to_string(), "name".to_string()]);

        let mut info = crash("Error: e", json!([1, 2]));
        info.mutated_fields = vec!["explicit".to_string()];
        assert_eq!(analyze_root_cause(&info).mutated_fields, vec!["explicit"]);
    }

    #[test]
    fn string_inputs_fall_back_to_embedded_document_keys() {
        let parsed = analyze_root_cause(&crash("Error: e", json!(r#"{"user":"x","role":"y"}"#)));
        assert_eq!(parsed.mutated_fields, vec!["role".to_string(), "user".to_string()]);

        // Unparseable fragment still yields key-shaped tokens.
        let scanned = analyze_root_cause(&crash("Error: e", json!(r#"{"count": 3, "nam"#)));
        assert_eq!(scanned.mutated_fields, vec!["count".to_string()]);

        let plain = analyze_root_cause(&crash("Error: e", json!("just text")));
        assert!(plain.mutated_fields.is_empty());
    }
}
