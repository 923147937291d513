pub mod config;
pub mod corpus;
pub mod executor;
pub mod feedback;
pub mod fingerprint;
pub mod fuzzer;
pub mod generator;
pub mod input;
pub mod minimize;
pub mod mutator;
pub mod scheduler;
pub mod triage;

pub use config::{EnergyPolicy, FaultlineConfig, FuzzerSettings};
pub use corpus::{Corpus, CorpusError, CorpusStore, MinimizeReport, Seed};
pub use executor::{CommandExecutor, ExecOutcome, ExecutionStatus, Executor, ExecutorError};
pub use feedback::CoverageFeedback;
pub use fingerprint::{CrashFingerprint, extract_signal, normalize_stack_trace};
pub use fuzzer::{CrashType, FuzzCrash, FuzzResult, StopReason, fuzz_target};
pub use generator::{SeedFormat, boundary_values, grammar_seeds};
pub use input::ParamType;
pub use minimize::{MinimizedCrash, RootCause, minimize};
pub use mutator::{Mutator, TypeDirectedMutator};
pub use scheduler::{EnergyScheduler, Scheduler, SchedulerError};
pub use triage::{CrashCluster, CrashInfo, Severity, TriageError, TriageService, TriageStats};
