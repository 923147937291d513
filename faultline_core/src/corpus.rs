use crate::config::EnergyPolicy;
use crate::input::{byte_len, canonical_text, content_id};
use bincode::{
    self, Decode, Encode,
    config::{Configuration, Fixint, LittleEndian, NoLimit},
    error::{DecodeError, EncodeError},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors from seed-store operations.
#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("No corpus exists for target '{0}'")]
    TargetNotFound(String),

    #[error("Seed '{0}' not found in corpus")]
    SeedNotFound(String),

    #[error("Corpus I/O error: {0}")]
    Io(String),

    #[error("Corpus serialization error: {0}")]
    Serialization(String),

    #[error("Corpus deserialization error: {0}")]
    Deserialization(String),
}

impl From<std::io::Error> for CorpusError {
    fn from(err: std::io::Error) -> Self {
        CorpusError::Io(err.to_string())
    }
}
impl From<serde_json::Error> for CorpusError {
    fn from(err: serde_json::Error) -> Self {
        CorpusError::Deserialization(format!("JSON operation error: {}", err))
    }
}
impl From<EncodeError> for CorpusError {
    fn from(err: EncodeError) -> Self {
        CorpusError::Serialization(format!("Bincode encoding error: {}", err))
    }
}
impl From<DecodeError> for CorpusError {
    fn from(err: DecodeError) -> Self {
        CorpusError::Deserialization(format!("Bincode decoding error: {}", err))
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Lineage and provenance of a seed.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedMetadata {
    pub source: String,
    pub parent_id: Option<String>,
    pub tags: Vec<String>,
    pub size: u64,
}

/// One fuzz input plus its scheduling metrics.
///
/// `id` is the md5 of the canonical content, so identity is content-addressed
/// and re-adding the same value can never duplicate a seed.
#[derive(Debug, Clone, PartialEq)]
pub struct Seed {
    pub id: String,
    pub content: Value,
    pub added_at_ms: u64,
    pub last_used_ms: u64,
    pub execution_count: u64,
    /// Monotonic count of distinct coverage units ever attributed here.
    pub coverage_score: u64,
    pub crash_count: u64,
    /// Scheduling priority, clamped to the policy's min/max band.
    pub energy: u32,
    /// Golden seeds are never pruned and hold max energy permanently.
    pub is_golden: bool,
    pub coverage_units: BTreeSet<u32>,
    pub metadata: SeedMetadata,
}

/// On-disk form of a seed: one bincode record per seed file. Content is
/// carried as canonical JSON text, which keeps the record text-safe.
#[derive(Serialize, Deserialize, Encode, Decode, Debug, Clone, PartialEq)]
pub struct SeedRecord {
    pub id: String,
    pub content_json: String,
    pub added_at_ms: u64,
    pub last_used_ms: u64,
    pub execution_count: u64,
    pub coverage_score: u64,
    pub crash_count: u64,
    pub energy: u32,
    pub is_golden: bool,
    pub coverage_units: Vec<u32>,
    pub source: String,
    pub parent_id: Option<String>,
    pub tags: Vec<String>,
    pub size: u64,
}

impl Seed {
    fn new(content: Value, source: &str, parent_id: Option<String>, initial_energy: u32) -> Self {
        let now = now_ms();
        let size = byte_len(&content) as u64;
        Seed {
            id: content_id(&content),
            content,
            added_at_ms: now,
            last_used_ms: now,
            execution_count: 0,
            coverage_score: 0,
            crash_count: 0,
            energy: initial_energy,
            is_golden: false,
            coverage_units: BTreeSet::new(),
            metadata: SeedMetadata {
                source: source.to_string(),
                parent_id,
                tags: Vec::new(),
                size,
            },
        }
    }

    fn to_record(&self) -> SeedRecord {
        SeedRecord {
            id: self.id.clone(),
            content_json: canonical_text(&self.content),
            added_at_ms: self.added_at_ms,
            last_used_ms: self.last_used_ms,
            execution_count: self.execution_count,
            coverage_score: self.coverage_score,
            crash_count: self.crash_count,
            energy: self.energy,
            is_golden: self.is_golden,
            coverage_units: self.coverage_units.iter().copied().collect(),
            source: self.metadata.source.clone(),
            parent_id: self.metadata.parent_id.clone(),
            tags: self.metadata.tags.clone(),
            size: self.size(),
        }
    }

    fn from_record(record: SeedRecord) -> Result<Self, CorpusError> {
        let content: Value = serde_json::from_str(&record.content_json).map_err(|e| {
            CorpusError::Deserialization(format!(
                "seed '{}' has unparseable content: {e}",
                record.id
            ))
        })?;
        Ok(Seed {
            id: record.id,
            content,
            added_at_ms: record.added_at_ms,
            last_used_ms: record.last_used_ms,
            execution_count: record.execution_count,
            coverage_score: record.coverage_score,
            crash_count: record.crash_count,
            energy: record.energy,
            is_golden: record.is_golden,
            coverage_units: record.coverage_units.into_iter().collect(),
            metadata: SeedMetadata {
                source: record.source,
                parent_id: record.parent_id,
                tags: record.tags,
                size: record.size,
            },
        })
    }

    pub fn size(&self) -> u64 {
        self.metadata.size
    }
}

/// Aggregate counters for one corpus.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct CorpusStats {
    pub total_seeds: usize,
    pub golden_seeds: usize,
    pub total_executions: u64,
    pub total_crashes: u64,
    pub total_coverage_units: usize,
}

/// Result of a corpus minimization pass.
#[derive(Debug, Clone, PartialEq)]
pub struct MinimizeReport {
    pub pruned: usize,
    pub kept_golden: usize,
    pub avg_energy: f64,
}

/// The full seed population for one fuzz target.
#[derive(Debug, Clone)]
pub struct Corpus {
    pub target_id: String,
    /// Incremented on every minimization pass, never on metric updates.
    pub version: u64,
    seeds: HashMap<String, Seed>,
    /// Union of all coverage units ever observed for this target; the
    /// denominator for minimization.
    pub total_coverage: BTreeSet<u32>,
}

impl Corpus {
    fn new(target_id: &str) -> Self {
        Corpus {
            target_id: target_id.to_string(),
            version: 0,
            seeds: HashMap::new(),
            total_coverage: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    pub fn get_seed(&self, seed_id: &str) -> Option<&Seed> {
        self.seeds.get(seed_id)
    }

    pub fn seeds(&self) -> impl Iterator<Item = &Seed> {
        self.seeds.values()
    }

    pub fn stats(&self) -> CorpusStats {
        CorpusStats {
            total_seeds: self.seeds.len(),
            golden_seeds: self.seeds.values().filter(|s| s.is_golden).count(),
            total_executions: self.seeds.values().map(|s| s.execution_count).sum(),
            total_crashes: self.seeds.values().map(|s| s.crash_count).sum(),
            total_coverage_units: self.total_coverage.len(),
        }
    }

    fn apply_execution(
        &mut self,
        seed_id: &str,
        new_coverage: Option<&BTreeSet<u32>>,
        found_crash: bool,
        policy: &EnergyPolicy,
    ) -> Result<(), CorpusError> {
        let total_coverage = &mut self.total_coverage;
        let seed = self
            .seeds
            .get_mut(seed_id)
            .ok_or_else(|| CorpusError::SeedNotFound(seed_id.to_string()))?;

        seed.execution_count += 1;
        seed.last_used_ms = now_ms();

        let mut discovered = 0u64;
        if let Some(coverage) = new_coverage {
            discovered = coverage.difference(total_coverage).count() as u64;
            seed.coverage_score += discovered;
            seed.coverage_units.extend(coverage.iter().copied());
            total_coverage.extend(coverage.iter().copied());
        }

        if discovered > 0 {
            seed.energy = seed
                .energy
                .saturating_add(policy.coverage_bonus)
                .min(policy.max_energy);
        } else {
            seed.energy = seed
                .energy
                .saturating_sub(policy.decay)
                .max(policy.min_energy);
        }

        if found_crash {
            seed.crash_count += 1;
            seed.energy = seed
                .energy
                .saturating_add(policy.crash_bonus)
                .min(policy.max_energy);
        }

        if seed.is_golden {
            seed.energy = policy.max_energy;
        }
        Ok(())
    }
}

/// Explicit context object owning one corpus per target. Passed by reference
/// into the loop and triage rather than living as a process-global, so
/// independent fuzzing sessions can coexist in one process.
pub struct CorpusStore {
    policy: EnergyPolicy,
    corpora: HashMap<String, Corpus>,
}

const CORPUS_META_FILENAME: &str = "corpus_meta.json";
const SEED_FILE_EXTENSION: &str = "seed";

#[derive(Serialize, Deserialize, Debug)]
struct CorpusMeta {
    target_id: String,
    version: u64,
    total_coverage: Vec<u32>,
    stats: CorpusStats,
}

fn bincode_config() -> Configuration<LittleEndian, Fixint, NoLimit> {
    bincode::config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
}

impl CorpusStore {
    pub fn new(policy: EnergyPolicy) -> Self {
        CorpusStore {
            policy,
            corpora: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &EnergyPolicy {
        &self.policy
    }

    pub fn corpus(&self, target_id: &str) -> Option<&Corpus> {
        self.corpora.get(target_id)
    }

    /// Adds a seed, creating the target's corpus lazily on first use.
    /// Identical content returns the existing seed id instead of duplicating.
    pub fn add_seed(
        &mut self,
        target_id: &str,
        content: Value,
        source: &str,
        parent_id: Option<String>,
    ) -> String {
        let corpus = self
            .corpora
            .entry(target_id.to_string())
            .or_insert_with(|| Corpus::new(target_id));
        let id = content_id(&content);
        if !corpus.seeds.contains_key(&id) {
            let seed = Seed::new(content, source, parent_id, self.policy.initial_energy);
            corpus.seeds.insert(id.clone(), seed);
        }
        id
    }

    /// Folds one execution's outcome into a seed: coverage novelty grants an
    /// energy bonus (and extends the target's total coverage), stagnation
    /// decays energy toward the floor, and a crash grants an independent
    /// bonus. Golden seeds stay pinned at max energy throughout.
    pub fn update_seed_metrics(
        &mut self,
        target_id: &str,
        seed_id: &str,
        new_coverage: Option<&BTreeSet<u32>>,
        found_crash: bool,
    ) -> Result<(), CorpusError> {
        let corpus = self
            .corpora
            .get_mut(target_id)
            .ok_or_else(|| CorpusError::TargetNotFound(target_id.to_string()))?;
        corpus.apply_execution(seed_id, new_coverage, found_crash, &self.policy)
    }

    pub fn promote_to_golden(&mut self, target_id: &str, seed_id: &str) -> Result<(), CorpusError> {
        let corpus = self
            .corpora
            .get_mut(target_id)
            .ok_or_else(|| CorpusError::TargetNotFound(target_id.to_string()))?;
        let seed = corpus
            .seeds
            .get_mut(seed_id)
            .ok_or_else(|| CorpusError::SeedNotFound(seed_id.to_string()))?;
        seed.is_golden = true;
        seed.energy = self.policy.max_energy;
        Ok(())
    }

    /// Seeds ordered by energy descending (id as a deterministic tiebreak).
    pub fn seeds_by_energy(&self, target_id: &str, limit: usize) -> Vec<&Seed> {
        let Some(corpus) = self.corpora.get(target_id) else {
            return Vec::new();
        };
        let mut seeds: Vec<&Seed> = corpus.seeds.values().collect();
        seeds.sort_by(|a, b| b.energy.cmp(&a.energy).then_with(|| a.id.cmp(&b.id)));
        seeds.truncate(limit);
        seeds
    }

    /// Coverage-aware greedy set cover. Golden seeds are always retained and
    /// their units count as satisfied up front; after that, the seed covering
    /// the most still-uncovered units wins each round until no remaining seed
    /// contributes a unit. Everything unselected is discarded and the corpus
    /// version advances.
    pub fn minimize_corpus(&mut self, target_id: &str) -> Result<MinimizeReport, CorpusError> {
        let corpus = self
            .corpora
            .get_mut(target_id)
            .ok_or_else(|| CorpusError::TargetNotFound(target_id.to_string()))?;

        let mut covered: BTreeSet<u32> = BTreeSet::new();
        let mut retained: HashSet<String> = HashSet::new();
        let mut kept_golden = 0usize;

        for seed in corpus.seeds.values().filter(|s| s.is_golden) {
            covered.extend(seed.coverage_units.iter().copied());
            retained.insert(seed.id.clone());
            kept_golden += 1;
        }

        let mut remaining: Vec<(&String, &BTreeSet<u32>)> = corpus
            .seeds
            .values()
            .filter(|s| !s.is_golden)
            .map(|s| (&s.id, &s.coverage_units))
            .collect();
        // Deterministic scan order so equal contributions break ties stably.
        remaining.sort_by(|a, b| a.0.cmp(b.0));

        loop {
            let mut best: Option<(usize, usize)> = None; // (index, new units)
            for (idx, (id, units)) in remaining.iter().enumerate() {
                if retained.contains(*id) {
                    continue;
                }
                let gain = units.difference(&covered).count();
                if gain > 0 && best.map_or(true, |(_, g)| gain > g) {
                    best = Some((idx, gain));
                }
            }
            match best {
                Some((idx, _)) => {
                    let (id, units) = remaining[idx];
                    covered.extend(units.iter().copied());
                    retained.insert(id.clone());
                }
                None => break,
            }
        }

        let before = corpus.seeds.len();
        corpus.seeds.retain(|id, _| retained.contains(id));
        corpus.version += 1;

        let after = corpus.seeds.len();
        let avg_energy = if after > 0 {
            corpus.seeds.values().map(|s| s.energy as f64).sum::<f64>() / after as f64
        } else {
            0.0
        };
        Ok(MinimizeReport {
            pruned: before - after,
            kept_golden,
            avg_energy,
        })
    }

    /// Persists every corpus under `dir`: one subdirectory per target holding
    /// a JSON metadata file plus one bincode record per seed.
    pub fn save(&self, dir: &Path) -> Result<(), CorpusError> {
        for corpus in self.corpora.values() {
            let target_dir = dir.join(&corpus.target_id);
            fs::create_dir_all(&target_dir).map_err(|e| {
                CorpusError::Io(format!(
                    "failed to create corpus directory {:?}: {e}",
                    target_dir
                ))
            })?;

            // Drop records for seeds pruned since the last save.
            for entry in fs::read_dir(&target_dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|ext| ext == SEED_FILE_EXTENSION) {
                    fs::remove_file(&path)?;
                }
            }

            let meta = CorpusMeta {
                target_id: corpus.target_id.clone(),
                version: corpus.version,
                total_coverage: corpus.total_coverage.iter().copied().collect(),
                stats: corpus.stats(),
            };
            let meta_file = File::create(target_dir.join(CORPUS_META_FILENAME))?;
            serde_json::to_writer_pretty(BufWriter::new(meta_file), &meta).map_err(|e| {
                CorpusError::Serialization(format!("failed to write corpus metadata: {e}"))
            })?;

            for seed in corpus.seeds.values() {
                let record = seed.to_record();
                let bytes = bincode::encode_to_vec(&record, bincode_config())?;
                let path = target_dir.join(format!("seed_{}.{}", seed.id, SEED_FILE_EXTENSION));
                let mut file = File::create(&path)?;
                file.write_all(&bytes)?;
            }
        }
        Ok(())
    }

    /// Loads persisted corpora from `dir`. Malformed state never fails the
    /// process: a broken metadata file skips that target, a broken seed
    /// record skips that seed, each with a logged warning.
    pub fn load(dir: &Path, policy: EnergyPolicy) -> Self {
        let mut store = CorpusStore::new(policy);
        let Ok(entries) = fs::read_dir(dir) else {
            return store;
        };
        for entry in entries.flatten() {
            let target_dir = entry.path();
            if !target_dir.is_dir() {
                continue;
            }
            let meta_path = target_dir.join(CORPUS_META_FILENAME);
            let meta: CorpusMeta = match File::open(&meta_path)
                .map_err(CorpusError::from)
                .and_then(|f| {
                    serde_json::from_reader(BufReader::new(f)).map_err(CorpusError::from)
                }) {
                Ok(meta) => meta,
                Err(e) => {
                    log::warn!(
                        "skipping corpus at {:?}: unreadable metadata ({e}); starting empty",
                        target_dir
                    );
                    continue;
                }
            };

            let mut corpus = Corpus::new(&meta.target_id);
            corpus.version = meta.version;
            corpus.total_coverage = meta.total_coverage.into_iter().collect();

            if let Ok(seed_entries) = fs::read_dir(&target_dir) {
                for seed_entry in seed_entries.flatten() {
                    let path = seed_entry.path();
                    if !path.extension().is_some_and(|ext| ext == SEED_FILE_EXTENSION) {
                        continue;
                    }
                    let loaded = fs::read(&path)
                        .map_err(CorpusError::from)
                        .and_then(|bytes| {
                            bincode::decode_from_slice::<SeedRecord, _>(&bytes, bincode_config())
                                .map_err(CorpusError::from)
                        })
                        .and_then(|(record, _len)| Seed::from_record(record));
                    match loaded {
                        Ok(seed) => {
                            corpus.seeds.insert(seed.id.clone(), seed);
                        }
                        Err(e) => {
                            log::warn!("skipping seed record {:?}: {e}", path);
                        }
                    }
                }
            }
            store.corpora.insert(meta.target_id.clone(), corpus);
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn store() -> CorpusStore {
        CorpusStore::new(EnergyPolicy::default())
    }

    fn units(ids: &[u32]) -> BTreeSet<u32> {
        ids.iter().copied().collect()
    }

    #[test]
    fn add_seed_is_content_addressed_and_deduplicates() {
        let mut store = store();
        let id1 = store.add_seed("t", json!({"a": 1}), "initial", None);
        let id2 = store.add_seed("t", json!({"a": 1}), "fuzzer", None);
        assert_eq!(id1, id2);
        assert_eq!(store.corpus("t").unwrap().len(), 1);
        // The original seed, not the re-add, wins.
        assert_eq!(
            store.corpus("t").unwrap().get_seed(&id1).unwrap().metadata.source,
            "initial"
        );
    }

    #[test]
    fn corpus_is_created_lazily() {
        let mut store = store();
        assert!(store.corpus("t").is_none());
        store.add_seed("t", json!(1), "initial", None);
        assert!(store.corpus("t").is_some());
    }

    #[test]
    fn energy_stays_within_policy_band() {
        let mut store = store();
        let id = store.add_seed("t", json!("s"), "initial", None);

        // Repeated novel coverage and crashes push toward the cap.
        for i in 0..50u32 {
            store
                .update_seed_metrics("t", &id, Some(&units(&[i])), true)
                .unwrap();
            let energy = store.corpus("t").unwrap().get_seed(&id).unwrap().energy;
            assert!((10..=200).contains(&energy), "energy {energy} out of band");
        }
        assert_eq!(store.corpus("t").unwrap().get_seed(&id).unwrap().energy, 200);

        // Stagnation decays toward the floor but never below it.
        for _ in 0..100 {
            store.update_seed_metrics("t", &id, None, false).unwrap();
        }
        assert_eq!(store.corpus("t").unwrap().get_seed(&id).unwrap().energy, 10);
    }

    #[test]
    fn repeat_coverage_decays_but_new_coverage_rewards() {
        let mut store = store();
        let id = store.add_seed("t", json!("s"), "initial", None);

        store
            .update_seed_metrics("t", &id, Some(&units(&[1, 2])), false)
            .unwrap();
        let boosted = store.corpus("t").unwrap().get_seed(&id).unwrap().energy;
        assert_eq!(boosted, 125);

        // Same units again: no novelty, so decay applies.
        store
            .update_seed_metrics("t", &id, Some(&units(&[1, 2])), false)
            .unwrap();
        let decayed = store.corpus("t").unwrap().get_seed(&id).unwrap().energy;
        assert_eq!(decayed, 120);

        let seed = store.corpus("t").unwrap().get_seed(&id).unwrap();
        assert_eq!(seed.coverage_score, 2);
        assert_eq!(seed.execution_count, 2);
    }

    #[test]
    fn crash_bonus_is_independent_of_coverage() {
        let mut store = store();
        let id = store.add_seed("t", json!("s"), "initial", None);
        store.update_seed_metrics("t", &id, None, true).unwrap();
        let seed = store.corpus("t").unwrap().get_seed(&id).unwrap();
        // Decay (no new coverage) then crash bonus: 100 - 5 + 50.
        assert_eq!(seed.energy, 145);
        assert_eq!(seed.crash_count, 1);
    }

    #[test]
    fn golden_seed_is_pinned_at_max_energy() {
        let mut store = store();
        let id = store.add_seed("t", json!("g"), "initial", None);
        store.promote_to_golden("t", &id).unwrap();
        assert_eq!(store.corpus("t").unwrap().get_seed(&id).unwrap().energy, 200);

        for _ in 0..20 {
            store.update_seed_metrics("t", &id, None, false).unwrap();
        }
        assert_eq!(store.corpus("t").unwrap().get_seed(&id).unwrap().energy, 200);
    }

    #[test]
    fn unknown_target_and_seed_are_errors() {
        let mut store = store();
        assert!(matches!(
            store.update_seed_metrics("none", "x", None, false),
            Err(CorpusError::TargetNotFound(_))
        ));
        store.add_seed("t", json!(1), "initial", None);
        assert!(matches!(
            store.update_seed_metrics("t", "missing", None, false),
            Err(CorpusError::SeedNotFound(_))
        ));
    }

    #[test]
    fn seeds_by_energy_orders_descending() {
        let mut store = store();
        let low = store.add_seed("t", json!("low"), "initial", None);
        let high = store.add_seed("t", json!("high"), "initial", None);
        for _ in 0..5 {
            store.update_seed_metrics("t", &low, None, false).unwrap();
        }
        store
            .update_seed_metrics("t", &high, Some(&units(&[1])), false)
            .unwrap();

        let ordered = store.seeds_by_energy("t", 10);
        assert_eq!(ordered[0].id, high);
        assert_eq!(ordered[1].id, low);
        assert_eq!(store.seeds_by_energy("t", 1).len(), 1);
        assert!(store.seeds_by_energy("missing", 10).is_empty());
    }

    #[test]
    fn greedy_set_cover_keeps_the_dominating_seed() {
        let mut store = store();
        let a = store.add_seed("t", json!("A"), "initial", None);
        let b = store.add_seed("t", json!("B"), "initial", None);
        let c = store.add_seed("t", json!("C"), "initial", None);
        store.update_seed_metrics("t", &a, Some(&units(&[1, 2])), false).unwrap();
        store.update_seed_metrics("t", &b, Some(&units(&[2, 3])), false).unwrap();
        store.update_seed_metrics("t", &c, Some(&units(&[1, 2, 3])), false).unwrap();

        let report = store.minimize_corpus("t").unwrap();
        assert_eq!(report.pruned, 2);
        assert_eq!(report.kept_golden, 0);

        let corpus = store.corpus("t").unwrap();
        assert_eq!(corpus.len(), 1);
        assert!(corpus.get_seed(&c).is_some(), "C alone covers every unit");
        assert_eq!(corpus.version, 1);
    }

    #[test]
    fn minimization_preserves_coverage_union_and_golden_seeds() {
        let mut store = store();
        let a = store.add_seed("t", json!("A"), "initial", None);
        let b = store.add_seed("t", json!("B"), "initial", None);
        let c = store.add_seed("t", json!("C"), "initial", None);
        store.update_seed_metrics("t", &a, Some(&units(&[1, 2])), false).unwrap();
        store.update_seed_metrics("t", &b, Some(&units(&[3])), false).unwrap();
        store.update_seed_metrics("t", &c, Some(&units(&[1])), false).unwrap();
        store.promote_to_golden("t", &c).unwrap();

        let union_before: BTreeSet<u32> = store
            .corpus("t")
            .unwrap()
            .seeds()
            .flat_map(|s| s.coverage_units.iter().copied())
            .collect();

        let report = store.minimize_corpus("t").unwrap();
        assert_eq!(report.kept_golden, 1);

        let corpus = store.corpus("t").unwrap();
        assert!(corpus.get_seed(&c).is_some(), "golden always survives");
        let union_after: BTreeSet<u32> = corpus
            .seeds()
            .flat_map(|s| s.coverage_units.iter().copied())
            .collect();
        assert_eq!(union_before, union_after);
    }

    #[test]
    fn stats_aggregate_counters() {
        let mut store = store();
        let id = store.add_seed("t", json!("s"), "initial", None);
        store.update_seed_metrics("t", &id, Some(&units(&[1, 2])), true).unwrap();

        let stats = store.corpus("t").unwrap().stats();
        assert_eq!(stats.total_seeds, 1);
        assert_eq!(stats.total_executions, 1);
        assert_eq!(stats.total_crashes, 1);
        assert_eq!(stats.total_coverage_units, 2);
    }

    #[test]
    fn save_and_load_round_trips_corpus_state() {
        let dir = tempdir().unwrap();
        let mut store = store();
        let id = store.add_seed("tgt", json!({"k": [1, 2]}), "initial", None);
        store
            .update_seed_metrics("tgt", &id, Some(&units(&[5, 9])), true)
            .unwrap();
        store.promote_to_golden("tgt", &id).unwrap();
        store.minimize_corpus("tgt").unwrap();
        store.save(dir.path()).unwrap();

        let reloaded = CorpusStore::load(dir.path(), EnergyPolicy::default());
        let corpus = reloaded.corpus("tgt").expect("corpus restored");
        assert_eq!(corpus.version, 1);
        assert_eq!(corpus.total_coverage, units(&[5, 9]));

        let seed = corpus.get_seed(&id).expect("seed restored");
        assert_eq!(seed.content, json!({"k": [1, 2]}));
        assert!(seed.is_golden);
        assert_eq!(seed.crash_count, 1);
        assert_eq!(seed.coverage_units, units(&[5, 9]));
    }

    #[test]
    fn malformed_metadata_falls_back_to_empty() {
        let dir = tempdir().unwrap();
        let target_dir = dir.path().join("broken");
        fs::create_dir_all(&target_dir).unwrap();
        fs::write(target_dir.join(CORPUS_META_FILENAME), "{not json").unwrap();

        let store = CorpusStore::load(dir.path(), EnergyPolicy::default());
        assert!(store.corpus("broken").is_none());
    }

    #[test]
    fn malformed_seed_record_is_skipped() {
        let dir = tempdir().unwrap();
        let mut store = store();
        store.add_seed("tgt", json!("good"), "initial", None);
        store.save(dir.path()).unwrap();
        fs::write(dir.path().join("tgt").join("seed_bogus.seed"), b"\xFF\xFE").unwrap();

        let reloaded = CorpusStore::load(dir.path(), EnergyPolicy::default());
        assert_eq!(reloaded.corpus("tgt").unwrap().len(), 1);
    }
}
