use crate::config::FuzzerSettings;
use crate::corpus::{CorpusStore, now_ms};
use crate::executor::{ExecutionStatus, Executor, ExecutorError};
use crate::feedback::CoverageFeedback;
use crate::fingerprint::extract_signal;
use crate::generator;
use crate::input::{ParamType, canonical_bytes};
use crate::mutator::{Mutator, TypeDirectedMutator};
use crate::scheduler::{EnergyScheduler, Scheduler};
use crate::triage::{CrashInfo, Severity, TriageService};
use rand::Rng;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashType {
    Exception,
    Timeout,
    Memory,
    Assertion,
}

/// One crash as surfaced by a fuzzing run.
#[derive(Debug, Clone)]
pub struct FuzzCrash {
    pub input: Value,
    pub error: String,
    pub trace: String,
    pub crash_type: CrashType,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The execution budget ran out.
    BudgetExhausted,
    /// Nothing left to try: every queued input was executed and none spawned
    /// follow-ups.
    QueueDrained,
    /// Best-seen coverage reached the configured threshold.
    CoverageThreshold,
    /// External cancellation flag was raised.
    Cancelled,
}

/// Summary of one fuzzing run against a single target.
#[derive(Debug)]
pub struct FuzzResult {
    pub target_id: String,
    pub executions: u64,
    pub crashes: Vec<FuzzCrash>,
    pub interesting_inputs: u64,
    pub coverage_percent: Option<f64>,
    pub duration: Duration,
    pub stop_reason: StopReason,
}

/// Maps an execution failure to a crash class and severity. First match
/// wins: resource exhaustion outranks typed exceptions, which outrank
/// assertion failures.
fn classify_crash(status: &ExecutionStatus, trace: &str) -> (CrashType, Severity) {
    if matches!(status, ExecutionStatus::Timeout) {
        return (CrashType::Timeout, Severity::High);
    }
    let lowered = trace.to_lowercase();
    if lowered.contains("stack overflow") || lowered.contains("out of memory") {
        (CrashType::Memory, Severity::Critical)
    } else if trace.contains("RangeError") || trace.contains("TypeError") {
        (CrashType::Exception, Severity::High)
    } else if lowered.contains("assert") {
        (CrashType::Assertion, Severity::Medium)
    } else {
        (CrashType::Exception, Severity::Medium)
    }
}

/// A queued input plus the corpus seed that gets scheduling credit for
/// whatever this input discovers.
struct QueueItem {
    input: Value,
    credit_seed: Option<String>,
}

/// The coverage-guided fuzzing loop for one target.
///
/// Seeds the work queue from the corpus (by descending energy) or, for a
/// cold target, from boundary-value candidates for the declared parameter
/// types. Each execution feeds coverage novelty back into seed energy;
/// interesting inputs join the corpus and spawn mutations, crashes go to
/// triage and spawn a smaller burst of mutations around the crashing input.
/// When the queue drains with budget left, one corpus seed is drawn through
/// the energy-weighted scheduler and a fresh mutation of it is enqueued; the
/// run stops with `QueueDrained` only when the corpus has nothing to offer.
///
/// Only adapter failures abort the run. Crashes and timeouts of the target
/// are results, not errors.
pub fn fuzz_target<R: Rng>(
    target_id: &str,
    executor: &mut dyn Executor,
    param_types: &[ParamType],
    settings: &FuzzerSettings,
    store: &mut CorpusStore,
    triage: &mut TriageService,
    rng: &mut R,
    cancel: &AtomicBool,
) -> Result<FuzzResult, ExecutorError> {
    let start = Instant::now();
    let timeout = Duration::from_millis(settings.timeout_ms);
    let mut feedback = CoverageFeedback::new(executor.coverage_capacity());
    let mut mutator = TypeDirectedMutator::new();
    let mut scheduler = EnergyScheduler::new();

    let mut queue: VecDeque<QueueItem> = VecDeque::new();
    let corpus_seeds = store.seeds_by_energy(target_id, settings.seed_batch);
    if corpus_seeds.is_empty() {
        for candidate in generator::initial_candidates(param_types) {
            queue.push_back(QueueItem {
                input: candidate,
                credit_seed: None,
            });
        }
        log::info!("target {target_id}: cold start, {} boundary candidates", queue.len());
    } else {
        for seed in corpus_seeds {
            queue.push_back(QueueItem {
                input: seed.content.clone(),
                credit_seed: Some(seed.id.clone()),
            });
        }
        log::info!("target {target_id}: scheduled {} corpus seeds", queue.len());
    }

    let mut executions = 0u64;
    let mut interesting_inputs = 0u64;
    let mut crashes: Vec<FuzzCrash> = Vec::new();
    let mut stop_reason = StopReason::BudgetExhausted;

    while executions < settings.max_executions {
        if cancel.load(Ordering::Relaxed) {
            stop_reason = StopReason::Cancelled;
            break;
        }
        let item = match queue.pop_front() {
            Some(item) => item,
            None => {
                let picked = {
                    let candidates = store.seeds_by_energy(target_id, settings.seed_batch);
                    scheduler
                        .select(&candidates, &mut *rng)
                        .ok()
                        .map(|seed| (seed.content.clone(), seed.id.clone()))
                };
                let Some((content, seed_id)) = picked else {
                    stop_reason = StopReason::QueueDrained;
                    break;
                };
                match mutator.mutate(&content, rng) {
                    Ok(mutant) => queue.push_back(QueueItem {
                        input: mutant,
                        credit_seed: Some(seed_id),
                    }),
                    Err(e) => {
                        log::warn!("mutation failed during refill: {e}");
                        stop_reason = StopReason::QueueDrained;
                        break;
                    }
                }
                continue;
            }
        };

        let bytes = canonical_bytes(&item.input);
        let outcome = executor.run(&bytes, timeout)?;
        executions += 1;

        let crashed = outcome.crashed();
        let mut credit_seed = item.credit_seed.clone();

        if let Some(cov) = &outcome.coverage {
            if feedback.is_interesting(cov) {
                feedback.record(cov);
                interesting_inputs += 1;
                let seed_id = store.add_seed(
                    target_id,
                    item.input.clone(),
                    "fuzzer",
                    item.credit_seed.clone(),
                );
                credit_seed = Some(seed_id);
                for _ in 0..settings.mutations_per_find {
                    match mutator.mutate(&item.input, rng) {
                        Ok(mutant) => queue.push_back(QueueItem {
                            input: mutant,
                            credit_seed: credit_seed.clone(),
                        }),
                        Err(e) => log::warn!("mutation failed: {e}"),
                    }
                }
            }
        }

        if let Some(seed_id) = &credit_seed {
            if let Err(e) =
                store.update_seed_metrics(target_id, seed_id, outcome.coverage.as_ref(), crashed)
            {
                log::warn!("seed metric update failed for {seed_id}: {e}");
            }
        }

        if crashed {
            let trace = outcome.error.clone().unwrap_or_else(|| match &outcome.status {
                ExecutionStatus::Crash(desc) => desc.clone(),
                ExecutionStatus::Timeout => "execution timed out".to_string(),
                ExecutionStatus::Ok => String::new(),
            });
            let (crash_type, severity) = classify_crash(&outcome.status, &trace);
            log::info!("target {target_id}: crash ({crash_type:?}, {severity:?})");

            triage.ingest(CrashInfo {
                timestamp_ms: now_ms(),
                signal: Some(extract_signal(&trace)),
                stack_trace: trace.clone(),
                input: item.input.clone(),
                coverage: outcome.coverage.clone(),
                tainted_vars: Vec::new(),
                mutated_fields: Vec::new(),
            });
            crashes.push(FuzzCrash {
                input: item.input.clone(),
                error: trace.clone(),
                trace,
                crash_type,
                severity,
            });

            // Over-sample around the crash: nearby inputs often expose
            // variants of the same bug or its neighbors.
            for _ in 0..settings.crash_mutations {
                match mutator.mutate(&item.input, rng) {
                    Ok(mutant) => queue.push_back(QueueItem {
                        input: mutant,
                        credit_seed: credit_seed.clone(),
                    }),
                    Err(e) => log::warn!("mutation failed: {e}"),
                }
            }
        }

        if let (Some(threshold), Some(percent)) =
            (settings.coverage_threshold, feedback.coverage_percent())
        {
            if percent >= threshold {
                stop_reason = StopReason::CoverageThreshold;
                break;
            }
        }
    }

    let result = FuzzResult {
        target_id: target_id.to_string(),
        executions,
        crashes,
        interesting_inputs,
        coverage_percent: feedback.coverage_percent(),
        duration: start.elapsed(),
        stop_reason,
    };
    log::info!(
        "target {target_id}: {} executions, {} crashes, {} interesting, stop: {:?}",
        result.executions,
        result.crashes.len(),
        result.interesting_inputs,
        result.stop_reason
    );
    Ok(result)
}
