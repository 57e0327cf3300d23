//! `scene-verify`: runs the stress and fault-injection suite against the
//! reference engine.

use std::path::PathBuf;

use clap::{ArgAction, Parser};
use scene_stress::cli::{
    parse_color_choice, parse_intensity, verbosity_level, ColorChoice, ExitCode, Output,
    OutputFormat,
};
use scene_stress::runner::scenarios::default_registry;
use scene_stress::runner::{reference_factory, Runner};
use scene_stress::{Error, ErrorKind, HarnessConfig, Result};

#[derive(Parser, Debug)]
#[command(
    name = "scene-verify",
    version,
    about = "Stress and fault-injection suite for acceleration-structure scene engines"
)]
struct Cli {
    /// Run only tests whose name matches (repeatable)
    #[arg(long = "run", value_name = "REGEX")]
    run: Vec<String>,

    /// Skip tests whose name matches (repeatable)
    #[arg(long = "skip", value_name = "REGEX")]
    skip: Vec<String>,

    /// Report grouped tests individually
    #[arg(long = "no-groups", action = ArgAction::SetTrue)]
    no_groups: bool,

    /// Scale every scenario's scene count; rounded up, so any positive value runs at least one scene
    #[arg(long = "intensity", value_parser = parse_intensity)]
    intensity: Option<f64>,

    /// Worker threads for threaded scenarios
    #[arg(long = "threads")]
    threads: Option<usize>,

    /// First scene index
    #[arg(long = "seed")]
    seed: Option<u64>,

    /// JSON configuration file
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Print the selected tests and exit
    #[arg(long = "list", action = ArgAction::SetTrue)]
    list: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbosity: u8,

    /// Color output: auto, always, never
    #[arg(short = 'c', long = "color", value_parser = parse_color_choice)]
    color: Option<ColorChoice>,

    /// Print the summary as JSON
    #[arg(long = "json", action = ArgAction::SetTrue)]
    json: bool,
}

fn main() {
    let cli = Cli::parse();
    let _ = tracing_subscriber::fmt()
        .with_max_level(verbosity_level(cli.verbosity))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_names(true)
        .try_init();

    let code = match run(&cli) {
        Ok(failed) => ExitCode::from_failed_tests(failed),
        Err(err) => {
            eprintln!("scene-verify: {err}");
            ExitCode::USER_ERROR
        }
    };
    std::process::exit(code);
}

fn load_config(cli: &Cli) -> Result<HarnessConfig> {
    let base = match &cli.config {
        Some(path) => HarnessConfig::from_json_file(path)?,
        None => HarnessConfig::default(),
    };
    let mut config = base.with_env()?;
    if let Some(intensity) = cli.intensity {
        config = config.with_intensity(intensity);
    }
    if let Some(threads) = cli.threads {
        config = config.with_threads(threads);
    }
    if let Some(seed) = cli.seed {
        config = config.with_seed_base(seed);
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: &Cli) -> Result<usize> {
    let config = load_config(cli)?;
    tracing::info!(
        intensity = config.intensity,
        threads = config.thread_count(),
        seed_base = config.seed_base,
        "starting run"
    );

    let mut runner =
        Runner::new(default_registry(), config, reference_factory()).with_groups(!cli.no_groups);
    for pattern in &cli.run {
        if runner.registry_mut().run_matching(pattern)? == 0 {
            tracing::warn!(pattern = %pattern, "--run matched no test");
        }
    }
    for pattern in &cli.skip {
        runner.registry_mut().skip_matching(pattern)?;
    }

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    let mut out = Output::new(format);
    if let Some(color) = cli.color {
        out = out.with_color(color);
    }
    let write_failed = |e: std::io::Error| {
        Error::new(ErrorKind::UnknownFailure)
            .with_message("cannot write report")
            .with_source(e)
    };

    if cli.list {
        for test in runner.registry().tests().iter().filter(|t| t.enabled()) {
            out.line(test.name()).map_err(write_failed)?;
        }
        return Ok(0);
    }

    let summary = runner.run(&mut out).map_err(write_failed)?;
    Ok(summary.failed())
}
