use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::Level;
use warden_audit::{tail, verify_log, AuditSink, JsonlAuditLog};
use warden_core::telemetry::init_tracing;
use warden_core::{
    format_results, scaffold_file_name, AuditStatus, Gateway, GatewayConfig, QueryPipeline,
    ScaffoldPipeline, SessionOutcome, SessionSettings,
};
use warden_infer::{Generator, HttpChatGenerator};
use warden_schema::{BuiltinSchemaSource, SchemaDescriptor, SchemaSource, YamlSchemaSource};
use warden_store::LogStore;
use warden_syntax::SourceGrammar;
use warden_types::CostRecord;

#[derive(Parser)]
#[command(name = "warden", about = "Validate model-generated clauses and modules before use")]
struct Cli {
    /// YAML config file; WARDEN_* variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,
    /// Raise log verbosity (-v info, -vv debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a question about the log store in plain language.
    Query {
        request: String,
        #[arg(long)]
        db: Option<PathBuf>,
        /// Table descriptor (YAML); defaults to the built-in audit_logs table.
        #[arg(long)]
        schema: Option<PathBuf>,
    },
    /// Generate a syntax-checked module from a description.
    Scaffold {
        description: String,
        /// Record/enum contracts (YAML).
        #[arg(long)]
        contracts: Option<PathBuf>,
        /// Directory to write the module into instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, default_value = "python")]
        grammar: SourceGrammar,
    },
    Audit {
        #[command(subcommand)]
        action: AuditCommand,
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum AuditCommand {
    Tail {
        #[arg(long, default_value_t = 10)]
        lines: usize,
    },
    Verify,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    init_tracing(cli.log_json, level);

    let cfg = GatewayConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Query { request, db, schema } => run_query(&cfg, &request, db, schema).await,
        Command::Scaffold {
            description,
            contracts,
            output,
            grammar,
        } => run_scaffold(&cfg, &description, contracts, output, grammar).await,
        Command::Audit { action, path } => {
            let path = path.unwrap_or_else(|| cfg.audit_log.clone());
            match action {
                AuditCommand::Tail { lines } => {
                    for line in tail(&path, lines)? {
                        println!("{line}");
                    }
                }
                AuditCommand::Verify => {
                    let count = verify_log(&path)?;
                    println!("audit log ok ({count} records)");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn generator(cfg: &GatewayConfig) -> Arc<dyn Generator> {
    Arc::new(HttpChatGenerator::new(
        cfg.llm.url.clone(),
        cfg.llm.model.clone(),
        cfg.llm.api_key.clone(),
    ))
}

async fn run_query(
    cfg: &GatewayConfig,
    request: &str,
    db: Option<PathBuf>,
    schema: Option<PathBuf>,
) -> anyhow::Result<ExitCode> {
    let descriptor = match schema.or_else(|| cfg.schema_path.clone()) {
        Some(path) => YamlSchemaSource::new(&path).load()?,
        None => BuiltinSchemaSource.load()?,
    };
    let table = descriptor.table()?.clone();

    let db = db.unwrap_or_else(|| cfg.db_path.clone());
    let store = Arc::new(
        LogStore::open(&db, table.clone(), cfg.row_limit)
            .with_context(|| format!("opening log store {}", db.display()))?,
    );
    let audit: Arc<dyn AuditSink> = if store.accepts_events() {
        store.clone() as Arc<dyn AuditSink>
    } else {
        Arc::new(JsonlAuditLog::open(&cfg.audit_log)?)
    };

    let gateway = Gateway::new(generator(cfg), audit, SessionSettings::from(cfg));
    let pipeline = QueryPipeline::new(gateway, &table, store, cfg)?;
    let resp = pipeline.run(request).await?;
    report_audit(&resp.report.audit);

    if let Some(message) = resp.report.error_message() {
        eprintln!("ERROR: {message}");
        if let SessionOutcome::Rejected { last_candidate, .. } = &resp.report.outcome {
            if !last_candidate.is_empty() {
                eprintln!("Generated clause: {last_candidate}");
            }
        }
        return Ok(ExitCode::FAILURE);
    }

    println!("{}", format_results(&resp.rows));
    if let Some(clause) = resp.report.artifact() {
        eprintln!("\n--- Query Info ---");
        eprintln!("  WHERE clause: {}", clause.as_str());
    }
    print_cost(&resp.report.cost, resp.report.retries);
    Ok(ExitCode::SUCCESS)
}

async fn run_scaffold(
    cfg: &GatewayConfig,
    description: &str,
    contracts: Option<PathBuf>,
    output: Option<PathBuf>,
    grammar: SourceGrammar,
) -> anyhow::Result<ExitCode> {
    let contracts = load_contracts(contracts, cfg.contracts_path.as_deref())?;
    let audit = Arc::new(JsonlAuditLog::open(&cfg.audit_log)?);
    let gateway = Gateway::new(generator(cfg), audit, SessionSettings::from(cfg));
    let pipeline = ScaffoldPipeline::new(gateway, grammar, contracts.as_ref(), cfg);

    let report = pipeline.run(description).await;
    report_audit(&report.audit);

    if let Some(message) = report.error_message() {
        eprintln!("ERROR: {message}");
        if let SessionOutcome::Rejected { last_candidate, .. } = &report.outcome {
            if !last_candidate.is_empty() {
                eprintln!("\n--- Generated (invalid) code ---");
                eprintln!("{last_candidate}");
            }
        }
        return Ok(ExitCode::FAILURE);
    }

    if let Some(code) = report.artifact() {
        match output {
            Some(dir) => {
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("creating {}", dir.display()))?;
                let file = dir.join(scaffold_file_name(description, grammar));
                std::fs::write(&file, code.as_str())
                    .with_context(|| format!("writing {}", file.display()))?;
                println!("Generated: {}", file.display());
            }
            None => println!("{}", code.as_str()),
        }
    }

    eprintln!("\n--- Generation Info ---");
    eprintln!("  Validation: PASSED");
    print_cost(&report.cost, report.retries);
    Ok(ExitCode::SUCCESS)
}

/// An explicit `--contracts` path must load; the configured default may be
/// absent.
fn load_contracts(
    explicit: Option<PathBuf>,
    configured: Option<&Path>,
) -> anyhow::Result<Option<SchemaDescriptor>> {
    if let Some(path) = explicit {
        return Ok(Some(YamlSchemaSource::new(path).load()?));
    }
    match configured {
        Some(path) if path.exists() => Ok(Some(YamlSchemaSource::new(path).load()?)),
        Some(path) => {
            tracing::info!(event = "contracts.missing", path = %path.display());
            Ok(None)
        }
        None => Ok(None),
    }
}

fn report_audit(status: &AuditStatus) {
    if let AuditStatus::Failed(e) = status {
        eprintln!("WARNING: audit record not written: {e}");
    }
}

fn print_cost(cost: &CostRecord, retries: u32) {
    eprintln!("  Retries: {retries}");
    eprintln!("  Tokens: {} in / {} out", cost.tokens_in, cost.tokens_out);
    eprintln!("  Cost: ${:.6}", cost.cost_usd);
}
