use crate::corpus::now_ms;
use crate::fingerprint::CrashFingerprint;
use crate::input::byte_len;
use crate::minimize::MinimizedCrash;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TriageError {
    #[error("Triage I/O error: {0}")]
    Io(String),

    #[error("Triage serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for TriageError {
    fn from(err: std::io::Error) -> Self {
        TriageError::Io(err.to_string())
    }
}
impl From<serde_json::Error> for TriageError {
    fn from(err: serde_json::Error) -> Self {
        TriageError::Serialization(err.to_string())
    }
}

/// One observed crash, as reported by the fuzzing loop.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CrashInfo {
    pub timestamp_ms: u64,
    pub signal: Option<String>,
    pub stack_trace: String,
    pub input: Value,
    pub coverage: Option<BTreeSet<u32>>,
    /// Variables the reporter believes influenced the crash.
    pub tainted_vars: Vec<String>,
    /// Input fields mutated on the path that produced this crash.
    pub mutated_fields: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// All crashes sharing one fingerprint.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CrashCluster {
    pub fingerprint: CrashFingerprint,
    pub count: u64,
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
    pub crashes: Vec<CrashInfo>,
    /// The smallest-input member seen so far.
    pub representative: CrashInfo,
    /// Assessed once when the cluster is created; later members are the same
    /// bug, so re-scoring them would only let noise flip the label.
    pub severity: Severity,
    /// 0-100 score carried over from minimization, once one member has been
    /// minimized.
    pub exploitability: Option<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TriageStats {
    pub total_crashes: u64,
    pub unique_crashes: usize,
    /// Percentage (0-100) of observed crashes that were duplicates of a
    /// known cluster.
    pub deduplication_rate: f64,
}

/// Ranks a crash by what its trace claims went wrong. Memory corruption
/// outranks logic errors, which outrank validation noise.
fn classify_severity(trace: &str) -> Severity {
    let lowered = trace.to_lowercase();
    const CRITICAL: &[&str] = &[
        "sigsegv",
        "segmentation fault",
        "memory corruption",
        "use-after-free",
        "use after free",
        "heap overflow",
        "stack smashing",
    ];
    const HIGH: &[&str] = &[
        "sigabrt",
        "abort",
        "assert",
        "auth",
        "injection",
        "out of memory",
    ];
    const MEDIUM: &[&str] = &["typeerror", "rangeerror", "reference", "sanitize", "validate"];

    if CRITICAL.iter().any(|kw| lowered.contains(kw)) {
        Severity::Critical
    } else if HIGH.iter().any(|kw| lowered.contains(kw)) {
        Severity::High
    } else if MEDIUM.iter().any(|kw| lowered.contains(kw)) {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Deduplicates incoming crashes into fingerprint-keyed clusters.
#[derive(Debug, Default)]
pub struct TriageService {
    clusters: HashMap<String, CrashCluster>,
    total_crashes: u64,
}

impl TriageService {
    pub fn new() -> Self {
        TriageService::default()
    }

    /// Routes a crash to its cluster, creating one for a novel fingerprint.
    /// Returns the cluster's dedup key.
    pub fn ingest(&mut self, crash: CrashInfo) -> String {
        self.total_crashes += 1;
        let fingerprint = CrashFingerprint::new(&crash.stack_trace, crash.coverage.as_ref());
        let key = fingerprint.hash.clone();

        match self.clusters.get_mut(&key) {
            Some(cluster) => {
                cluster.count += 1;
                cluster.last_seen_ms = crash.timestamp_ms;
                if byte_len(&crash.input) < byte_len(&cluster.representative.input) {
                    cluster.representative = crash.clone();
                }
                cluster.crashes.push(crash);
            }
            None => {
                let severity = classify_severity(&crash.stack_trace);
                log::info!(
                    "new crash cluster {key} ({:?}, signal {})",
                    severity,
                    fingerprint.signal
                );
                self.clusters.insert(
                    key.clone(),
                    CrashCluster {
                        fingerprint,
                        count: 1,
                        first_seen_ms: crash.timestamp_ms,
                        last_seen_ms: crash.timestamp_ms,
                        representative: crash.clone(),
                        crashes: vec![crash],
                        severity,
                        exploitability: None,
                    },
                );
            }
        }
        key
    }

    /// Records a minimization result against its cluster, deriving the
    /// exploitability score from the root-cause confidence.
    pub fn attach_minimized(&mut self, cluster_key: &str, minimized: &MinimizedCrash) -> bool {
        match self.clusters.get_mut(cluster_key) {
            Some(cluster) => {
                cluster.exploitability = Some(minimized.root_cause.confidence);
                true
            }
            None => false,
        }
    }

    pub fn cluster(&self, key: &str) -> Option<&CrashCluster> {
        self.clusters.get(key)
    }

    /// Clusters ordered by severity descending, then by total count.
    pub fn clusters(&self) -> Vec<&CrashCluster> {
        let mut ordered: Vec<&CrashCluster> = self.clusters.values().collect();
        ordered.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(b.count.cmp(&a.count))
                .then(a.fingerprint.hash.cmp(&b.fingerprint.hash))
        });
        ordered
    }

    pub fn stats(&self) -> TriageStats {
        let unique = self.clusters.len();
        let deduplication_rate = if self.total_crashes > 0 {
            (1.0 - unique as f64 / self.total_crashes as f64) * 100.0
        } else {
            0.0
        };
        TriageStats {
            total_crashes: self.total_crashes,
            unique_crashes: unique,
            deduplication_rate,
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), TriageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        let snapshot: Vec<&CrashCluster> = self.clusters.values().collect();
        serde_json::to_writer_pretty(BufWriter::new(file), &snapshot)?;
        Ok(())
    }

    /// Restores clusters from a previous session. A missing or malformed
    /// file yields an empty service with a warning; losing stale triage
    /// state is preferable to refusing to start.
    pub fn load(path: &Path) -> Self {
        let mut service = TriageService::new();
        let clusters: Vec<CrashCluster> = match File::open(path) {
            Ok(file) => match serde_json::from_reader(BufReader::new(file)) {
                Ok(clusters) => clusters,
                Err(e) => {
                    log::warn!("discarding triage state at {:?}: {e}", path);
                    return service;
                }
            },
            Err(_) => return service,
        };
        for cluster in clusters {
            service.total_crashes += cluster.count;
            service
                .clusters
                .insert(cluster.fingerprint.hash.clone(), cluster);
        }
        service
    }
}
