use anyhow::{Context, anyhow};
use clap::Parser;
use faultline_core::config::{ConfigInputDelivery, FaultlineConfig};
use faultline_core::executor::{CommandExecutor, CommandExecutorConfig, Executor, InputDelivery};
use faultline_core::generator::{SeedFormat, grammar_seeds};
use faultline_core::input::ParamType;
use faultline_core::minimize::{self, DEFAULT_MAX_ITERATIONS};
use faultline_core::triage::TriageService;
use faultline_core::{CorpusStore, fuzz_target};
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Configuration used when no file is given: library defaults, spelled out
/// here so the fallback stays visible.
const DEFAULT_CONFIG_TOML: &str = r#"
[fuzzer]
max-executions = 1000
timeout-ms = 2000
"#;

const TRIAGE_STATE_FILENAME: &str = "triage.json";

#[derive(Parser, Debug)]
#[command(
    name = "faultline",
    about = "Coverage-guided fuzzer with crash triage and input minimization"
)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config_file: Option<PathBuf>,

    /// Identifier for this target; names its corpus on disk.
    #[arg(short, long, default_value = "default")]
    target_id: String,

    /// Target command line; overrides the [target] section of the config.
    #[arg(long, num_args = 1.., value_name = "CMD")]
    command: Vec<String>,

    /// Comma-separated parameter types used to generate cold-start inputs
    /// (string, number, boolean, object, array).
    #[arg(long, default_value = "string", value_delimiter = ',')]
    param_types: Vec<String>,

    /// Override the configured execution budget.
    #[arg(long)]
    max_executions: Option<u64>,

    /// Seed the corpus with well-formed documents of a structured format
    /// (json, graphql, xml, protobuf, http) before fuzzing.
    #[arg(long, value_name = "FORMAT")]
    seed_format: Option<String>,

    /// RNG seed for reproducible runs; derived from the clock when omitted.
    #[arg(long)]
    rng_seed: Option<u64>,

    /// Minimize each crash cluster's representative input after the run.
    #[arg(long)]
    minimize: bool,
}

fn parse_seed_format(name: &str) -> Result<SeedFormat, anyhow::Error> {
    match name.trim().to_lowercase().as_str() {
        "json" => Ok(SeedFormat::Json),
        "graphql" => Ok(SeedFormat::GraphQl),
        "xml" => Ok(SeedFormat::Xml),
        "protobuf" => Ok(SeedFormat::Protobuf),
        "http" => Ok(SeedFormat::Http),
        other => Err(anyhow!(
            "unknown seed format '{other}' (expected json, graphql, xml, protobuf, or http)"
        )),
    }
}

fn parse_param_type(name: &str) -> Result<ParamType, anyhow::Error> {
    match name.trim().to_lowercase().as_str() {
        "string" => Ok(ParamType::String),
        "number" => Ok(ParamType::Number),
        "boolean" | "bool" => Ok(ParamType::Boolean),
        "object" => Ok(ParamType::Object),
        "array" => Ok(ParamType::Array),
        other => Err(anyhow!(
            "unknown parameter type '{other}' (expected string, number, boolean, object, or array)"
        )),
    }
}

fn build_executor(config: &FaultlineConfig, cli: &Cli) -> Result<CommandExecutor, anyhow::Error> {
    let (command, delivery, working_dir) = if !cli.command.is_empty() {
        (cli.command.clone(), InputDelivery::StdIn, None)
    } else {
        let target = config
            .target
            .as_ref()
            .ok_or_else(|| anyhow!("no target: pass --command or a [target] config section"))?;
        let delivery = match &target.input_delivery {
            ConfigInputDelivery::StdIn => InputDelivery::StdIn,
            ConfigInputDelivery::File { template } => InputDelivery::File(template.clone()),
        };
        (target.command.clone(), delivery, target.working_dir.clone())
    };
    Ok(CommandExecutor::new(CommandExecutorConfig {
        command,
        input_delivery: delivery,
        working_dir,
    }))
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config_file {
        Some(path) => FaultlineConfig::load_from_file(path)
            .with_context(|| format!("loading configuration from {:?}", path))?,
        None => toml::from_str(DEFAULT_CONFIG_TOML).context("parsing built-in defaults")?,
    };
    if let Some(max_executions) = cli.max_executions {
        config.fuzzer.max_executions = max_executions;
    }

    let param_types: Vec<ParamType> = cli
        .param_types
        .iter()
        .map(|name| parse_param_type(name))
        .collect::<Result<_, _>>()?;

    let mut executor = build_executor(&config, &cli)?;

    let state_dir = &config.corpus.state_dir;
    let mut store = CorpusStore::load(state_dir, config.energy);
    let mut triage = TriageService::load(&state_dir.join(TRIAGE_STATE_FILENAME));

    if let Some(format_name) = &cli.seed_format {
        let format = parse_seed_format(format_name)?;
        let seeds = grammar_seeds(format);
        log::info!("seeding corpus with {} {format_name} documents", seeds.len());
        for seed in seeds {
            store.add_seed(&cli.target_id, seed, "grammar", None);
        }
    }

    if let Some(seed_paths) = &config.corpus.initial_seed_paths {
        for path in seed_paths {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading seed file {:?}", path))?;
            let value = serde_json::from_str(&text)
                .unwrap_or(serde_json::Value::String(text));
            store.add_seed(&cli.target_id, value, "initial", None);
        }
    }

    let rng_seed = cli.rng_seed.unwrap_or_else(clock_seed);
    let mut rng = ChaCha8Rng::seed_from_u64(rng_seed);
    log::info!("starting run for target '{}' with rng seed {rng_seed}", cli.target_id);

    let cancel = AtomicBool::new(false);
    let result = fuzz_target(
        &cli.target_id,
        &mut executor,
        &param_types,
        &config.fuzzer,
        &mut store,
        &mut triage,
        &mut rng,
        &cancel,
    )
    .map_err(|e| anyhow!("fuzzing aborted: {e}"))?;

    println!("--- run summary: {} ---", result.target_id);
    println!("executions:          {}", result.executions);
    println!("interesting inputs:  {}", result.interesting_inputs);
    println!("crashes observed:    {}", result.crashes.len());
    match result.coverage_percent {
        Some(percent) => println!("coverage:            {percent:.1}%"),
        None => println!("coverage:            unavailable (no instrumentation)"),
    }
    println!("duration:            {:.2}s", result.duration.as_secs_f64());
    println!("stop reason:         {:?}", result.stop_reason);

    let stats = triage.stats();
    println!(
        "\nunique crash clusters: {} ({} total, {:.0}% deduplicated)",
        stats.unique_crashes, stats.total_crashes, stats.deduplication_rate
    );
    let cluster_keys: Vec<String> = triage
        .clusters()
        .iter()
        .map(|c| c.fingerprint.hash.clone())
        .collect();
    for key in &cluster_keys {
        // Keys come straight from the cluster listing above.
        let Some(cluster) = triage.cluster(key) else {
            continue;
        };
        println!(
            "  [{:?}] {} x{} ({})",
            cluster.severity, cluster.fingerprint.signal, cluster.count, cluster.fingerprint.hash
        );
    }

    if cli.minimize && !cluster_keys.is_empty() {
        let timeout = Duration::from_millis(config.fuzzer.timeout_ms);
        println!("\nminimizing cluster representatives...");
        for key in &cluster_keys {
            let Some(representative) = triage.cluster(key).map(|c| c.representative.clone())
            else {
                continue;
            };
            let minimized = minimize::minimize(
                &representative,
                |bytes| {
                    executor
                        .run(bytes, timeout)
                        .map(|outcome| outcome.crashed())
                        .unwrap_or(false)
                },
                DEFAULT_MAX_ITERATIONS,
            );
            triage.attach_minimized(key, &minimized);
            println!(
                "  {key}: {} -> {} bytes ({:.0}% smaller), likely cause: {} ({}% confidence)",
                serde_json::to_vec(&representative.input).map(|v| v.len()).unwrap_or(0),
                minimized.minimized_input.len(),
                minimized.reduction_percent,
                minimized.root_cause.likely_cause,
                minimized.root_cause.confidence
            );
        }
    }

    store
        .save(state_dir)
        .with_context(|| format!("persisting corpus state to {:?}", state_dir))?;
    triage
        .save(&state_dir.join(TRIAGE_STATE_FILENAME))
        .context("persisting triage state")?;
    log::info!("state saved to {:?}", state_dir);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_format_names_parse_case_insensitively() {
        assert_eq!(parse_seed_format("json").unwrap(), SeedFormat::Json);
        assert_eq!(parse_seed_format("GraphQL").unwrap(), SeedFormat::GraphQl);
        assert_eq!(parse_seed_format(" http ").unwrap(), SeedFormat::Http);
        assert!(parse_seed_format("yaml").is_err());
    }

    #[test]
    fn every_parseable_format_yields_seeds() {
        for name in ["json", "graphql", "xml", "protobuf", "http"] {
            let format = parse_seed_format(name).unwrap();
            assert!(!grammar_seeds(format).is_empty(), "no seeds for {name}");
        }
    }

    #[test]
    fn param_type_names_parse() {
        assert_eq!(parse_param_type("string").unwrap(), ParamType::String);
        assert_eq!(parse_param_type("bool").unwrap(), ParamType::Boolean);
        assert!(parse_param_type("tuple").is_err());
    }
}
