//! CLI front-end for the chiplet operator-graph compiler.
//!
//! Loads a chiplet `Config`, derives the `Topology`, optionally attaches a
//! NoC latency oracle, selects a command-descriptor source (a built-in
//! benchmark or a user-supplied model spec), and emits
//! `chiplet_commands.json`. Any fatal error prints a single diagnostic line
//! to stderr and exits non-zero — no partial output is ever written.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use chiplet_graph_compiler::config::Config;
use chiplet_graph_compiler::error::ChipletCompilerError;
use chiplet_graph_compiler::oracle::OracleClient;
use chiplet_graph_compiler::topology::Topology;
use chiplet_graph_compiler::{build_benchmark, check_invariants, emitter, spec_compiler};

/// Compile a transformer/MoE workload into a chiplet command descriptor graph.
#[derive(Debug, Parser)]
#[command(name = "chiplet-compiler", version)]
struct Cli {
    /// Built-in benchmark to compile. Ignored if `--model-spec` is given.
    /// `"TRANSFORMER"` (case-insensitive) selects a six-deep transformer
    /// pipeline; any other value composes one attention + MoE + SwiGlu block.
    #[arg(long, default_value = "transformer")]
    benchmark: String,

    /// User-supplied model-spec JSON path. Overrides `--benchmark` when given.
    #[arg(long)]
    model_spec: Option<PathBuf>,

    /// Chiplet configuration JSON path. Falls back to built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory `chiplet_commands.json` is written into.
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// NoC oracle executable, overriding `UPIMULATOR_BOOKSIM_SERVICE` and
    /// config-driven discovery. A failure here is always fatal, since giving
    /// this flag counts as explicitly requesting the oracle.
    #[arg(long)]
    oracle: Option<PathBuf>,

    /// Disable oracle discovery entirely, even if a binary is found on the
    /// search path.
    #[arg(long)]
    no_oracle: bool,
}

fn main() {
    env_logger::init();

    if let Err(err) = run() {
        eprintln!("chiplet-compiler: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), ChipletCompilerError> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    let topology = Topology::from_config(&config);

    let oracle = attach_oracle(&cli, &config)?;

    let commands = if let Some(spec_path) = &cli.model_spec {
        let spec = spec_compiler::load(spec_path)?;
        spec_compiler::compile(&spec, &config, &topology, oracle.as_ref())?
    } else {
        build_benchmark(&cli.benchmark, &config, &topology)?
    };

    if let Some(oracle) = oracle {
        oracle.shutdown();
    }

    check_invariants(&commands, &topology)?;
    emitter::emit(&commands, &cli.out_dir)?;

    log::info!(
        "compiled {} commands from {}",
        commands.len(),
        cli.model_spec
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| format!("benchmark `{}`", cli.benchmark)),
    );

    Ok(())
}

/// Resolve and spawn the NoC oracle client, if one is wanted. A path given
/// on the command line or in `config.oracle.executable` counts as an
/// explicit request: spawn failure there is fatal. A path found only by
/// `--no-oracle`-eligible discovery is best-effort: spawn failure there is
/// logged once and compilation proceeds without it (§7 OracleUnavailable).
fn attach_oracle(cli: &Cli, config: &Config) -> Result<Option<OracleClient>, ChipletCompilerError> {
    if !config.oracle.enabled || cli.no_oracle {
        return Ok(None);
    }

    let deadline = Duration::from_millis(config.oracle.deadline_ms);

    let explicit = cli.oracle.clone().or_else(|| config.oracle.executable.clone());
    if let Some(path) = explicit {
        return Ok(Some(OracleClient::spawn(&path, deadline)?));
    }

    let search_root: &Path = cli
        .config
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or_else(|| Path::new("."));

    match OracleClient::discover(search_root) {
        Some(path) => match OracleClient::spawn(&path, deadline) {
            Ok(client) => Ok(Some(client)),
            Err(e) => {
                log::warn!("discovered oracle at {} but it failed to start: {e}; continuing without it", path.display());
                Ok(None)
            }
        },
        None => Ok(None),
    }
}
