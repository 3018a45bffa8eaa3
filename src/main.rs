mod config;
mod executor;
mod forge;
mod llm;
mod logger;
mod project;
mod repair;
mod report;
mod state;
mod testgen;
mod tools;

use std::{
    collections::HashMap,
    error::Error,
    fs,
    path::PathBuf,
    sync::Arc,
};

use clap::{Args, Parser, Subcommand};

use crate::{
    config::{AppConfig, LlmConfig, Provider},
    executor::pool::default_workers,
    forge::{
        classify::ClassifierMode,
        invoker::{BuildInvoker, ForgeCompiler},
        project::{build_project, write_remappings},
    },
    llm::client::LlmClient,
    logger::Logger,
    project::{
        layout::{CandidatePaths, ProjectLayout},
        source::{read_sources, select, SourceUnit},
    },
    repair::{
        batch::{precheck, BatchDriver, CheckState},
        RepairLimits, Strategy,
    },
    report::BatchReport,
    testgen::generator::{Generator, Technique},
};

#[derive(Parser)]
#[command(
    name = "invarforge",
    version,
    about = "Generate Foundry test contracts with an LLM and repair them until they compile."
)]
struct Cli {
    /// Foundry project root
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    /// Contracts directory relative to the project root
    #[arg(long, global = true)]
    contracts: Option<String>,

    /// Config file used instead of <project>/invarforge.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model name override
    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Generate X.t.sol for the selected contracts
    Generate(GenerateArgs),
    /// Compile every existing test once and list the failing ones
    Check(CheckArgs),
    /// Repair failing tests until they compile or their budget runs out
    Repair(RepairArgs),
    /// Run `forge build` on the whole project
    Build,
    /// Regenerate remappings.txt
    Remappings,
    /// Store LLM provider settings in the user config
    Configure(ConfigureArgs),
}

#[derive(Args)]
struct GenerateArgs {
    /// Source files (Foo.sol or Foo); all contracts when empty
    files: Vec<String>,

    #[arg(long, value_enum, default_value_t = Technique::ZeroShot)]
    technique: Technique,

    /// Extra invariants for one contract, e.g. --invariant "Vault.sol=withdraw never exceeds balance"
    #[arg(long = "invariant", value_name = "FILE=TEXT")]
    invariants: Vec<String>,

    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Args)]
struct CheckArgs {
    files: Vec<String>,

    #[arg(long, value_enum)]
    classifier: Option<ClassifierMode>,

    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Args)]
struct RepairArgs {
    files: Vec<String>,

    /// Wall-clock budget per candidate
    #[arg(long)]
    budget_secs: Option<u64>,

    /// Compile attempts per candidate (0 = no cap)
    #[arg(long)]
    max_attempts: Option<u32>,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long, value_enum)]
    strategy: Option<Strategy>,

    #[arg(long, value_enum)]
    classifier: Option<ClassifierMode>,

    /// Write the JSON report to this file
    #[arg(long)]
    out: Option<PathBuf>,

    /// Print only the JSON report
    #[arg(long, default_value_t = false)]
    json_only: bool,
}

#[derive(Args)]
struct ConfigureArgs {
    #[arg(long, default_value = "openai")]
    provider: String,

    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    api_key: String,

    #[arg(long)]
    base_url: Option<String>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let project = fs::canonicalize(&cli.project)
        .map_err(|e| format!("project {}: {}", cli.project.display(), e))?;

    let mut cfg = AppConfig::load(&project, cli.config.as_deref());
    if let Some(contracts) = &cli.contracts {
        cfg.layout.contracts_dir = contracts.clone();
    }
    if let Some(model) = &cli.model {
        cfg.llm.model = model.clone();
    }

    let layout = ProjectLayout::new(&project, &cfg.layout.contracts_dir, &cfg.layout.test_dir);

    match cli.command {
        CliCommand::Generate(args) => generate(cfg, layout, args),
        CliCommand::Check(args) => check(cfg, layout, args),
        CliCommand::Repair(args) => repair(cfg, layout, args),
        CliCommand::Build => build(&cfg, &layout),
        CliCommand::Remappings => {
            let forge = ForgeCompiler::new(&cfg.forge.binary);
            let path = write_remappings(&forge, &layout, &cfg.forge.extra_remappings)?;
            println!("remappings written to: {}", path.display());
            Ok(())
        }
        CliCommand::Configure(args) => configure(cfg.llm, args),
    }
}

/* ============================================================
   Commands
   ============================================================ */

fn generate(cfg: AppConfig, layout: ProjectLayout, args: GenerateArgs) -> Result<(), Box<dyn Error>> {
    let log = Logger::new(true);
    let units = selected_sources(&layout, &args.files)?;
    let custom = parse_invariants(&args.invariants)?;

    let llm = Arc::new(LlmClient::new(cfg.llm.clone())?);
    let workers = args.workers.or(cfg.repair.workers).unwrap_or_else(default_workers);

    let generator = Generator::new(
        layout,
        llm,
        args.technique,
        cfg.llm.model.clone(),
        cfg.llm.request_timeout(),
        workers,
        log,
    );

    let results = generator.generate_all(&units, &custom);
    let failed = results.iter().filter(|(_, r)| r.is_err()).count();

    println!("generated: {}, failed: {}", results.len() - failed, failed);
    if failed > 0 {
        return Err(format!("{failed} contract(s) failed to generate").into());
    }
    Ok(())
}

fn check(cfg: AppConfig, layout: ProjectLayout, args: CheckArgs) -> Result<(), Box<dyn Error>> {
    let log = Logger::new(true);
    let candidates = selected_candidates(&layout, &args.files)?;
    prepare(&layout, &log)?;

    let classifier = args.classifier.unwrap_or(cfg.repair.classifier);
    let invoker = invoker(&cfg, &layout, classifier);
    let workers = args.workers.or(cfg.repair.workers).unwrap_or_else(default_workers);

    let entries = precheck(&invoker, &candidates, workers);
    for e in &entries {
        match &e.state {
            CheckState::Compiles => println!("  ok       {}", e.name),
            CheckState::Fails(first) => println!("  failing  {}  {}", e.name, first),
            CheckState::Missing => println!("  missing  {}", e.name),
            CheckState::Error(err) => println!("  error    {}  {}", e.name, err),
        }
    }

    let failing = entries.iter().filter(|e| e.needs_repair()).count();
    println!("{} of {} test(s) need repair", failing, entries.len());
    Ok(())
}

fn repair(mut cfg: AppConfig, layout: ProjectLayout, args: RepairArgs) -> Result<(), Box<dyn Error>> {
    if let Some(b) = args.budget_secs {
        cfg.repair.budget_secs = b;
    }
    if let Some(n) = args.max_attempts {
        cfg.repair.max_attempts = n;
    }
    if let Some(s) = args.strategy {
        cfg.repair.strategy = s;
    }
    if let Some(c) = args.classifier {
        cfg.repair.classifier = c;
    }

    let log = Logger::new(!args.json_only);
    let candidates = selected_candidates(&layout, &args.files)?;
    prepare(&layout, &log)?;

    let llm = Arc::new(LlmClient::new(cfg.llm.clone())?);
    let limits = RepairLimits::from_config(&cfg);
    let workers = args.workers.or(cfg.repair.workers).unwrap_or_else(default_workers);

    let driver = BatchDriver::new(
        invoker(&cfg, &layout, cfg.repair.classifier),
        llm,
        limits,
        cfg.repair.strategy,
        workers,
        log.clone(),
    );

    let result = driver.run_all(&candidates);
    let report = BatchReport::new(
        result,
        &layout.root,
        cfg.repair.strategy,
        cfg.repair.classifier,
        &limits,
        &log,
    );

    if let Some(path) = args.out.as_ref() {
        report.write(path)?;
    }

    if args.json_only {
        println!("{}", report.to_json()?);
        return Ok(());
    }

    print!("{}", report.summary());
    if let Some(path) = args.out.as_ref() {
        println!("report written to: {}", path.display());
    }
    Ok(())
}

fn build(cfg: &AppConfig, layout: &ProjectLayout) -> Result<(), Box<dyn Error>> {
    let forge = ForgeCompiler::new(&cfg.forge.binary);
    let report = build_project(&forge, layout, cfg.repair.classifier)?;

    println!("build output written to: {}", report.path.display());
    if !report.status.is_success() {
        return Err(format!("{} build failed", forge.binary().display()).into());
    }
    Ok(())
}

fn configure(current: LlmConfig, args: ConfigureArgs) -> Result<(), Box<dyn Error>> {
    if args.api_key.trim().is_empty() {
        return Err("API key cannot be empty".into());
    }

    let llm = LlmConfig {
        provider: Provider::parse(&args.provider)?,
        model: args.model.unwrap_or(current.model.clone()),
        api_key: args.api_key,
        base_url: args.base_url,
        ..current
    };

    let path = AppConfig::save_llm(&llm)?;
    println!("configuration saved to: {}", path.display());
    Ok(())
}

/* ============================================================
   Helpers
   ============================================================ */

fn selected_sources(layout: &ProjectLayout, files: &[String]) -> Result<Vec<SourceUnit>, String> {
    let units = select(read_sources(&layout.contracts_dir)?, files);
    if units.is_empty() {
        return Err(format!("no matching contracts in {}", layout.contracts_dir.display()));
    }
    Ok(units)
}

fn selected_candidates(layout: &ProjectLayout, files: &[String]) -> Result<Vec<CandidatePaths>, String> {
    Ok(selected_sources(layout, files)?
        .iter()
        .map(|u| layout.candidate(&u.filename))
        .collect())
}

/// Mirrors the project into the scratch directory and drops old reports.
fn prepare(layout: &ProjectLayout, log: &Logger) -> Result<(), String> {
    let copied = layout.prepare_scratch()?;
    let removed = layout.clear_stale_reports()?;
    log.info(format!(
        "scratch {}: {} entries refreshed, {} stale report(s) removed",
        layout.scratch_dir.display(),
        copied,
        removed
    ));
    Ok(())
}

fn invoker(cfg: &AppConfig, layout: &ProjectLayout, classifier: ClassifierMode) -> BuildInvoker {
    BuildInvoker::new(
        Arc::new(ForgeCompiler::new(&cfg.forge.binary)),
        layout.scratch_dir.clone(),
        classifier,
    )
}

/// `Vault.sol=text` or `Vault=text`, keyed by source filename.
fn parse_invariants(raw: &[String]) -> Result<HashMap<String, String>, String> {
    let mut out: HashMap<String, String> = HashMap::new();

    for item in raw {
        let (file, text) = item
            .split_once('=')
            .ok_or_else(|| format!("expected FILE=TEXT, got: {item}"))?;

        let file = file.trim();
        let key = if file.ends_with(".sol") {
            file.to_string()
        } else {
            format!("{file}.sol")
        };

        let entry = out.entry(key).or_default();
        if !entry.is_empty() {
            entry.push('\n');
        }
        entry.push_str(text.trim());
    }

    Ok(out)
}
