use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use foundry_eval_core::{
	generate_html_report, standard_registry, ConfigKind, ConfigurationError, CredentialChain, DataSource,
	ExecutionMode, ExecutionStrategy, HttpRemoteClient, InvocationContext, JsonlDataSource, LocalExecution,
	Orchestrator, ProjectHandle, Registry, RemoteExecution, ResultWriter, RunSettings, Settings, Store,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "foundry-eval", about = "Run category evaluations over a JSONL dataset")]
struct Cli {
	/// Debug logging (RUST_LOG takes precedence)
	#[arg(short, long, global = true)]
	verbose: bool,

	/// Load environment settings from this file instead of ./.env
	#[arg(long, global = true)]
	env_file: Option<PathBuf>,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
	/// Evaluate a dataset
	Run(RunArgs),
	/// List built-in evaluators
	List,
	/// Show past stats of one evaluator from a results database
	History(HistoryArgs),
}

#[derive(Debug, Clone, Parser)]
struct RunArgs {
	/// JSONL file with one record per line: { "query", "context", "response", "ground_truth", ... }
	#[arg(long)]
	data: PathBuf,

	/// Execution mode: local or remote
	#[arg(long, env = "EVAL_EXECUTION_MODE")]
	mode: Option<ExecutionMode>,

	/// YAML run file (mode, evaluators, concurrency, retry, rate limit, timeouts)
	#[arg(long)]
	config: Option<PathBuf>,

	/// Comma separated evaluator names; default is every evaluator whose configuration is available
	#[arg(long, value_delimiter = ',')]
	evaluators: Vec<String>,

	/// Maximum calls in flight
	#[arg(long)]
	concurrency: Option<usize>,

	/// Directory for per-category JSONL results and the run summary
	#[arg(long, default_value = foundry_eval_core::writer::DEFAULT_OUTPUT_DIR)]
	out: PathBuf,

	/// Also write an HTML report here
	#[arg(long)]
	html: Option<PathBuf>,

	/// Save the run into this SQLite database
	#[arg(long)]
	db: Option<PathBuf>,
}

#[derive(Debug, Clone, Parser)]
struct HistoryArgs {
	#[arg(long)]
	db: PathBuf,

	#[arg(long)]
	evaluator: String,
}

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();

	match &cli.env_file {
		Some(path) => {
			if let Err(err) = dotenvy::from_path(path) {
				eprintln!("error: failed to load {}: {err}", path.display());
				return ExitCode::from(2);
			}
		}
		None => {
			dotenvy::dotenv().ok();
		}
	}
	init_tracing(cli.verbose);

	let result = match cli.command {
		Commands::Run(args) => run(args).await,
		Commands::List => list(),
		Commands::History(args) => history(args),
	};

	match result {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) if err.downcast_ref::<ConfigurationError>().is_some() => {
			eprintln!("configuration error: {err:#}");
			ExitCode::from(2)
		}
		Err(err) => {
			eprintln!("error: {err:#}");
			ExitCode::FAILURE
		}
	}
}

fn init_tracing(verbose: bool) {
	let default = if verbose {
		"foundry_eval=debug,foundry_eval_core=debug"
	} else {
		"foundry_eval=info,foundry_eval_core=info"
	};
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
	fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();
}

async fn run(args: RunArgs) -> Result<()> {
	let base = match &args.config {
		Some(path) => RunSettings::from_yaml_file(path)?,
		None => RunSettings::default(),
	};
	let mut settings = Settings::from_lookup(base, |key| std::env::var(key).ok())?;
	if let Some(mode) = args.mode {
		settings.run.mode = mode;
	}
	if let Some(n) = args.concurrency {
		settings.run.max_in_flight = n;
	}
	if !args.evaluators.is_empty() {
		settings.run.evaluators = args.evaluators.clone();
	}
	settings.run.validate()?;
	settings.log_summary();

	let records = JsonlDataSource::new(&args.data).load().await?;

	let http = reqwest::Client::new();
	let registry = Arc::new(standard_registry(&http).map_err(ConfigurationError::from)?);
	let project = resolve_project(&settings, &registry).await?;

	let strategy: Arc<dyn ExecutionStrategy> = match settings.run.mode {
		ExecutionMode::Local => Arc::new(LocalExecution::new(settings.run.local_timeout())),
		ExecutionMode::Remote => {
			let handle = project.clone().ok_or_else(|| {
				ConfigurationError::MissingSetting(
					"AZURE_SUBSCRIPTION_ID, AZURE_RESOURCE_GROUP and AZURE_AI_FOUNDRY_PROJECT (remote mode)".into(),
				)
			})?;
			let client = Arc::new(HttpRemoteClient::new(http.clone(), handle));
			Arc::new(RemoteExecution::new(client, settings.run.poll, settings.run.retry))
		}
	};

	let orchestrator = Orchestrator::builder()
		.registry(registry)
		.strategy(strategy)
		.context(InvocationContext::new(settings.model.clone(), project))
		.retry(settings.run.retry)
		.rate_limit(settings.run.rate_limit)
		.max_in_flight(settings.run.max_in_flight)
		.build()?;

	let token = orchestrator.cancellation_token();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			warn!("Interrupt received, cancelling run");
			token.cancel();
		}
	});

	let result = orchestrator.evaluate(&records, &settings.run.evaluators).await?;
	println!("{}", result.summary_table());

	let written = ResultWriter::new(&args.out).write(&result, &records)?;
	for (category, path) in &written.categories {
		println!("{category}: {}", path.display());
	}
	println!("Summary: {}", written.summary.display());

	if let Some(path) = &args.html {
		std::fs::write(path, generate_html_report(&result))
			.with_context(|| format!("Failed to write {:?}", path))?;
		println!("HTML report: {}", path.display());
	}

	if let Some(path) = &args.db {
		let store = Store::open(path)?;
		let run_id = store.save_run(&result)?;
		info!(run_id, db = ?path, "Saved run");
	}

	Ok(())
}

/// Resolves project credentials once, before the run, when anything will need them.
async fn resolve_project(settings: &Settings, registry: &Registry) -> Result<Option<ProjectHandle>, ConfigurationError> {
	let Some(config) = settings.project.clone() else {
		return Ok(None);
	};
	let needed = settings.run.mode == ExecutionMode::Remote
		|| settings.run.evaluators.is_empty()
		|| settings.run.evaluators.iter().any(|name| {
			registry
				.descriptor(name)
				.map(|d| d.config_kind == ConfigKind::Project)
				.unwrap_or(false)
		});
	if !needed {
		return Ok(None);
	}
	let token = CredentialChain::standard(settings.access_token.clone()).resolve().await?;
	Ok(Some(ProjectHandle { config, token }))
}

fn list() -> Result<()> {
	let registry = standard_registry(&reqwest::Client::new()).map_err(ConfigurationError::from)?;
	for entry in registry.iter() {
		let d = &entry.descriptor;
		println!(
			"{:<18} {:<20} {:<8} [{}, {}] threshold {} ({})  requires: {}",
			d.name,
			d.category.label(),
			format!("{:?}", d.config_kind),
			d.range.min,
			d.range.max,
			d.threshold,
			if d.higher_is_better { "higher is better" } else { "lower is better" },
			d.required_fields.join(", ")
		);
	}
	Ok(())
}

fn history(args: HistoryArgs) -> Result<()> {
	let store = Store::open(&args.db)?;
	let entries = store.evaluator_history(&args.evaluator)?;
	if entries.is_empty() {
		println!("No runs recorded for {}", args.evaluator);
		return Ok(());
	}
	for entry in entries {
		let s = &entry.stats;
		println!(
			"run {:>4}  {}  attempted {:>4}  succeeded {:>4}  passed {:>4}  pass rate {:.1}%",
			entry.run_id,
			entry.started_at.format("%Y-%m-%d %H:%M:%S"),
			s.attempted,
			s.succeeded,
			s.passed,
			s.pass_rate * 100.0
		);
	}
	Ok(())
}
