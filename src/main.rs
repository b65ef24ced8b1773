use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

use operator_expenses::{
    check_tax_id, init_logging, LogFormat, Pipeline, PipelineConfig, VERSION,
};

#[derive(Parser)]
#[command(name = "operator-expenses")]
#[command(about = "Consolidate, flag, enrich and aggregate regulator expense statements")]
#[command(version = VERSION)]
struct Cli {
    /// Log output format: pretty or json
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and write every configured artifact
    Run {
        /// TOML configuration file (defaults apply to every missing key)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory searched for expense files when none are given
        #[arg(long)]
        input_dir: Option<PathBuf>,

        /// Operator registry file
        #[arg(long)]
        registry: Option<PathBuf>,

        /// Directory for the output artifacts
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Source files to load; overrides directory discovery
        files: Vec<PathBuf>,
    },
    /// Check one or more tax identifiers (CNPJ)
    CheckTaxId {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let result = match cli.command {
        Commands::Run {
            config,
            input_dir,
            registry,
            output_dir,
            files,
        } => run_pipeline(config, input_dir, registry, output_dir, files),
        Commands::CheckTaxId { ids } => {
            check_tax_ids(&ids);
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_pipeline(
    config_path: Option<PathBuf>,
    input_dir: Option<PathBuf>,
    registry: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    files: Vec<PathBuf>,
) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    // CLI flags win over the file
    if input_dir.is_some() {
        config.input.source_dir = input_dir;
    }
    if registry.is_some() {
        config.registry.path = registry;
    }
    if let Some(dir) = output_dir {
        config.output.dir = dir;
    }

    let pipeline = Pipeline::new(config)?;
    let inputs = pipeline.resolve_inputs(&files)?;
    let report = pipeline.run(&inputs).context("Pipeline run failed")?;

    println!("📊 {}", report.summary());
    println!("   {}", report.load.summary());
    println!("   {}", report.quality.summary());
    println!("   {}", report.enrichment.summary());
    println!("   {}", report.validation.summary());

    if !report.top_groups.is_empty() {
        println!("🏆 Top {} operators by total expense:", report.top_groups.len());
        for (rank, group) in report.top_groups.iter().enumerate() {
            println!(
                "   {:>2}. {} ({}) - {:.2} over {} records",
                rank + 1,
                group.legal_name.as_deref().unwrap_or("-"),
                group.state_code.as_deref().unwrap_or("-"),
                group.total_expense,
                group.record_count
            );
        }
    }

    println!("📁 Artifacts in {}:", pipeline.config().output.dir.display());
    for artifact in &report.artifacts {
        println!("   ✓ {}", artifact.display());
    }

    Ok(())
}

fn check_tax_ids(ids: &[String]) {
    for id in ids {
        let check = check_tax_id(Some(id.as_str()));
        let mark = if check.is_valid() { "✓" } else { "✗" };
        println!("{} {} - {}", mark, id, check.description());
    }
}
