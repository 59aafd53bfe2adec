use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;

use crate::classifier::ModelKind;
use crate::fixtures::PredictorSelection;
use crate::pipeline::PipelineConfig;
use crate::records::Stat;
use crate::rolling::{DEFAULT_MODEL_WINDOWS, DEFAULT_WINDOWS, RollingConfig};

pub const DEFAULT_INPUT: &str = "matches.csv";
pub const DEFAULT_CUTOFF: &str = "2025-01-01";
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_LOG_FILTER: &str = "matchform=info";

pub const USAGE: &str = "\
usage: matchform [INPUT] [options]

  --input PATH              match rows, CSV or .parquet (MATCHFORM_INPUT, default matches.csv)
  --cutoff YYYY-MM-DD       first test date (MATCHFORM_CUTOFF, default 2025-01-01)
  --windows LIST            rolling windows to compute (MATCHFORM_WINDOWS, default 1,3,5,7,10)
  --model-windows LIST      rolling windows used as predictors (MATCHFORM_MODEL_WINDOWS, default 3,5,10)
  --stats LIST              statistics to roll (MATCHFORM_STATS, default all)
  --include-match-stats     also feed same-match statistics to the models
  --seed N                  run seed (MATCHFORM_SEED, default 42)
  --codes PATH              category dictionary JSON (MATCHFORM_CODES)
  --save-codes              write the updated dictionary back to --codes
  --models LIST             forest,dropout_net,compact_net (MATCHFORM_MODELS)
";

const VALUE_FLAGS: [&str; 8] = [
    "--input",
    "--cutoff",
    "--windows",
    "--model-windows",
    "--stats",
    "--seed",
    "--codes",
    "--models",
];
const SWITCHES: [&str; 3] = ["--include-match-stats", "--save-codes", "--help"];

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub input: PathBuf,
    pub pipeline: PipelineConfig,
    pub seed: u64,
    pub codes_path: Option<PathBuf>,
    pub save_codes: bool,
    pub models: Vec<ModelKind>,
}

impl RunConfig {
    /// Reads `.env.local`/`.env`, the process environment and the command line.
    pub fn from_env_and_args() -> Result<Self> {
        load_dotenv();
        let args: Vec<String> = env::args().skip(1).collect();
        Self::from_sources(&args, opt_env)
    }

    /// CLI flags win over `env`, which wins over the defaults.
    pub fn from_sources<F>(args: &[String], env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        check_flags(args)?;
        let setting = |flag: &str, key: &str| arg_value(args, flag).or_else(|| env(key));

        let input = positional(args)
            .or_else(|| setting("--input", "MATCHFORM_INPUT"))
            .unwrap_or_else(|| DEFAULT_INPUT.to_string());

        let cutoff_raw =
            setting("--cutoff", "MATCHFORM_CUTOFF").unwrap_or_else(|| DEFAULT_CUTOFF.to_string());
        let cutoff = NaiveDate::parse_from_str(cutoff_raw.trim(), "%Y-%m-%d")
            .with_context(|| format!("cutoff {cutoff_raw:?} is not YYYY-MM-DD"))?;

        let windows = match setting("--windows", "MATCHFORM_WINDOWS") {
            Some(raw) => parse_usize_list(&raw).context("--windows")?,
            None => DEFAULT_WINDOWS.to_vec(),
        };
        let model_windows = match setting("--model-windows", "MATCHFORM_MODEL_WINDOWS") {
            Some(raw) => parse_usize_list(&raw).context("--model-windows")?,
            None => DEFAULT_MODEL_WINDOWS.to_vec(),
        };
        let stats = match setting("--stats", "MATCHFORM_STATS") {
            Some(raw) => parse_stats(&raw)?,
            None => Stat::ALL.to_vec(),
        };
        let include_match_stats = has_flag(args, "--include-match-stats")
            || env("MATCHFORM_INCLUDE_MATCH_STATS").is_some_and(|v| parse_bool(&v));

        let seed = match setting("--seed", "MATCHFORM_SEED") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("seed {raw:?} is not an unsigned integer"))?,
            None => DEFAULT_SEED,
        };
        let codes_path = setting("--codes", "MATCHFORM_CODES").map(PathBuf::from);
        let save_codes = has_flag(args, "--save-codes");
        if save_codes && codes_path.is_none() {
            return Err(anyhow!("--save-codes needs a dictionary path (--codes)"));
        }
        let models = match setting("--models", "MATCHFORM_MODELS") {
            Some(raw) => parse_models(&raw)?,
            None => ModelKind::ALL.to_vec(),
        };

        let rolling = RollingConfig::new(stats, windows)?;
        let selection = PredictorSelection {
            model_windows,
            include_match_stats,
        };
        let pipeline = PipelineConfig::new(rolling, selection, cutoff)?;

        Ok(Self {
            input: PathBuf::from(input),
            pipeline,
            seed,
            codes_path,
            save_codes,
            models,
        })
    }
}

pub fn load_dotenv() {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
}

/// Stderr logging; `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|arg| arg == name)
}

fn opt_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|val| !val.trim().is_empty())
}

fn arg_value(args: &[String], name: &str) -> Option<String> {
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}="))
            && !raw.trim().is_empty()
        {
            return Some(raw.trim().to_string());
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

fn positional(args: &[String]) -> Option<String> {
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if VALUE_FLAGS.contains(&arg.as_str()) {
            skip_next = true;
            continue;
        }
        if !arg.starts_with("--") {
            return Some(arg.clone());
        }
    }
    None
}

fn check_flags(args: &[String]) -> Result<()> {
    for arg in args.iter().filter(|a| a.starts_with("--")) {
        let name = arg.split_once('=').map_or(arg.as_str(), |(n, _)| n);
        if !VALUE_FLAGS.contains(&name) && !SWITCHES.contains(&name) {
            return Err(anyhow!("unknown option {name}\n\n{USAGE}"));
        }
    }
    Ok(())
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split([',', ';', ' ']).map(str::trim).filter(|p| !p.is_empty())
}

fn parse_usize_list(raw: &str) -> Result<Vec<usize>> {
    split_list(raw)
        .map(|part| {
            part.parse::<usize>()
                .with_context(|| format!("{part:?} is not a window size"))
        })
        .collect()
}

fn parse_stats(raw: &str) -> Result<Vec<Stat>> {
    if raw.trim().eq_ignore_ascii_case("all") {
        return Ok(Stat::ALL.to_vec());
    }
    split_list(raw)
        .map(|part| Stat::from_name(part).ok_or_else(|| anyhow!("unknown statistic {part:?}")))
        .collect()
}

fn parse_models(raw: &str) -> Result<Vec<ModelKind>> {
    let mut out = Vec::new();
    for part in split_list(raw) {
        let kind = ModelKind::parse(part).ok_or_else(|| anyhow!("unknown model {part:?}"))?;
        if !out.contains(&kind) {
            out.push(kind);
        }
    }
    if out.is_empty() {
        return Err(anyhow!("no models selected"));
    }
    Ok(out)
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
