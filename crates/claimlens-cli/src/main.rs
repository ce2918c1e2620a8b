mod settings;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use claimlens_contracts::analysis::AnalysisResult;
use claimlens_contracts::claims::{write_claim_receipt, ClaimReceipt};
use claimlens_contracts::events::EventWriter;
use claimlens_contracts::providers::ProviderRegistry;
use claimlens_engine::ingestion::{
    format_file_size, ingest_local_path, ingest_remote_url, ImageRecord,
};
use claimlens_engine::{
    AnalysisConfig, AnalysisError, AnalysisOrchestrator, InferenceClient, JsonlProgressSink,
    ProviderKind, Tee,
};
use clap::{Args, Parser, Subcommand};

use crate::settings::{mask_key, CredentialStore};

const DRYRUN_API_KEY: &str = "dryrun";

#[derive(Debug, Parser)]
#[command(
    name = "claimlens",
    version,
    about = "Vehicle damage assessment from a single photo"
)]
struct Cli {
    /// Log at info level unless RUST_LOG says otherwise.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Analyze(AnalyzeArgs),
    Submit(SubmitArgs),
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
    Providers,
}

#[derive(Debug, Subcommand)]
enum KeyAction {
    Set { key: String },
    Clear,
    Show,
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
struct ImageSource {
    #[arg(long)]
    file: Option<PathBuf>,
    #[arg(long)]
    url: Option<String>,
}

#[derive(Debug, Args)]
struct AnalyzeArgs {
    #[command(flatten)]
    source: ImageSource,
    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    json: bool,
    /// Seconds to wait for the provider before giving up.
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Debug, Args)]
struct SubmitArgs {
    #[command(flatten)]
    analyze: AnalyzeArgs,
    #[arg(long)]
    out: PathBuf,
}

struct CompletedAnalysis {
    image: ImageRecord,
    provider: ProviderKind,
    result: AnalysisResult,
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("claimlens error: {err:#}");
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Command::Analyze(args) => {
            let store = CredentialStore::from_env()?;
            Ok(match run_analysis(&args, &store).await? {
                Some(_) => 0,
                None => 1,
            })
        }
        Command::Submit(args) => run_submit(args).await,
        Command::Key { action } => run_key(action),
        Command::Providers => {
            print_providers();
            Ok(0)
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

async fn run_analysis(
    args: &AnalyzeArgs,
    store: &CredentialStore,
) -> Result<Option<CompletedAnalysis>> {
    let provider = select_provider(args.provider.as_deref())?;
    let client = InferenceClient::new(analysis_config(provider, args))?;

    let image = match ingest(&args.source, client.http()).await {
        Ok(image) => image,
        Err(err) => {
            report_failure(&err);
            return Ok(None);
        }
    };
    if !args.json {
        println!(
            "Image: {} ({})",
            image.display_name(),
            format_file_size(image.byte_size())
        );
    }

    let api_key = resolve_api_key(args.api_key.as_deref(), provider, store)?.unwrap_or_default();
    let orchestrator = AnalysisOrchestrator::new(client);
    let json_output = args.json;
    let mut printer = move |snapshot: AnalysisResult| print_snapshot(&snapshot, json_output);

    let outcome = match args.events.as_ref() {
        Some(events_path) => {
            let run_id = format!("analysis-{}", Utc::now().format("%Y%m%dT%H%M%S%.3f"));
            let writer = EventWriter::new(events_path, run_id);
            let mut sink = Tee(printer, JsonlProgressSink::new(writer));
            orchestrator
                .analyze_image(&image, &api_key, Some(&mut sink))
                .await
        }
        None => {
            orchestrator
                .analyze_image(&image, &api_key, Some(&mut printer))
                .await
        }
    };

    match outcome {
        Ok(result) => Ok(Some(CompletedAnalysis {
            image,
            provider,
            result,
        })),
        Err(err) => {
            report_failure(&err);
            Ok(None)
        }
    }
}

async fn run_submit(args: SubmitArgs) -> Result<i32> {
    let store = CredentialStore::from_env()?;
    let Some(done) = run_analysis(&args.analyze, &store).await? else {
        return Ok(1);
    };
    let receipt = ClaimReceipt::new(
        done.image.display_name(),
        done.image.byte_size(),
        done.provider.id(),
        done.result,
    )?;
    let path = args.out.join(receipt.file_name());
    write_claim_receipt(&path, &receipt)
        .with_context(|| format!("failed writing claim {}", path.display()))?;
    if args.analyze.json {
        println!("{}", serde_json::to_string(&receipt)?);
    } else {
        println!("Claim {} submitted: {}", receipt.claim_id, path.display());
    }
    Ok(0)
}

fn run_key(action: KeyAction) -> Result<i32> {
    let store = CredentialStore::from_env()?;
    match action {
        KeyAction::Set { key } => {
            store.save(&key)?;
            println!("API key saved to {}", store.path().display());
        }
        KeyAction::Clear => {
            if store.clear()? {
                println!("API key cleared");
            } else {
                println!("No API key stored");
            }
        }
        KeyAction::Show => match store.load()? {
            Some(key) => println!("{}", mask_key(&key)),
            None => {
                println!("No API key stored");
                return Ok(1);
            }
        },
    }
    Ok(0)
}

fn print_providers() {
    let registry = ProviderRegistry::default();
    for spec in registry.providers() {
        let marker = if spec.is_active { "*" } else { " " };
        let model = spec
            .id
            .parse::<ProviderKind>()
            .map(ProviderKind::default_model)
            .unwrap_or("-");
        println!("{marker} {:<10} {:<10} {model}", spec.id, spec.name);
    }
}

fn analysis_config(provider: ProviderKind, args: &AnalyzeArgs) -> AnalysisConfig {
    let mut config = AnalysisConfig::from_env(provider);
    if let Some(model) = args.model.as_deref() {
        config = config.with_model(model);
    }
    if let Some(seconds) = args.timeout {
        config = config.with_timeout(Duration::from_secs(seconds));
    }
    config
}

fn select_provider(requested: Option<&str>) -> Result<ProviderKind> {
    let mut registry = ProviderRegistry::default();
    if let Some(id) = requested {
        registry
            .set_active(&id.trim().to_ascii_lowercase())
            .map_err(anyhow::Error::msg)?;
    }
    let active = registry.active().context("no active provider configured")?;
    Ok(active.id.parse::<ProviderKind>()?)
}

/// Flag, then the stored key, then the provider's environment variables.
fn resolve_api_key(
    flag: Option<&str>,
    provider: ProviderKind,
    store: &CredentialStore,
) -> Result<Option<String>> {
    if let Some(key) = flag.map(str::trim).filter(|value| !value.is_empty()) {
        return Ok(Some(key.to_string()));
    }
    if let Some(key) = store.load()? {
        return Ok(Some(key));
    }
    if let Some(key) = provider.api_key_from_env() {
        return Ok(Some(key));
    }
    if provider == ProviderKind::Dryrun {
        return Ok(Some(DRYRUN_API_KEY.to_string()));
    }
    Ok(None)
}

async fn ingest(
    source: &ImageSource,
    http: &reqwest::Client,
) -> Result<ImageRecord, AnalysisError> {
    match (&source.file, &source.url) {
        (Some(path), _) => ingest_local_path(path).await,
        (None, Some(url)) => ingest_remote_url(http, url).await,
        (None, None) => Err(AnalysisError::Unclassified(
            "either --file or --url is required".to_string(),
        )),
    }
}

fn print_snapshot(snapshot: &AnalysisResult, json_output: bool) {
    if json_output {
        match serde_json::to_string(snapshot) {
            Ok(line) => println!("{line}"),
            Err(err) => log::warn!("SNAPSHOT_ENCODE_FAILED error={err}"),
        }
        return;
    }
    if snapshot.is_loading {
        println!("Analyzing damage...");
        return;
    }
    if snapshot.error.is_some() {
        return;
    }
    println!("Make:            {}", snapshot.vehicle.make);
    println!("Model:           {}", snapshot.vehicle.model);
    println!("Color:           {}", snapshot.vehicle.color);
    println!("Damage:          {}", snapshot.damage_description);
    println!("Repair estimate: {}", snapshot.repair_estimate);
}

fn report_failure(err: &AnalysisError) {
    let classification = err.classification();
    eprintln!("{}", classification.headline());
    eprintln!("{}", classification.suggested_action);
    log::debug!("ANALYSIS_ERROR_RAW error={err}");
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn image_source_is_exactly_one_of_file_or_url() {
        assert!(Cli::try_parse_from(["claimlens", "analyze"]).is_err());
        assert!(Cli::try_parse_from([
            "claimlens",
            "analyze",
            "--file",
            "car.jpg",
            "--url",
            "https://example.test/car.jpg",
        ])
        .is_err());
        assert!(Cli::try_parse_from(["claimlens", "analyze", "--file", "car.jpg"]).is_ok());
        assert!(Cli::try_parse_from([
            "claimlens",
            "submit",
            "--url",
            "https://example.test/car.jpg",
            "--out",
            "claims",
        ])
        .is_ok());
    }

    #[test]
    fn model_and_timeout_flags_reach_config() -> Result<()> {
        let cli = Cli::try_parse_from([
            "claimlens",
            "analyze",
            "--file",
            "car.jpg",
            "--provider",
            "dryrun",
            "--model",
            "vision-x",
            "--timeout",
            "5",
        ])?;
        let Command::Analyze(args) = cli.command else {
            anyhow::bail!("expected analyze command");
        };
        let config = analysis_config(ProviderKind::Dryrun, &args);
        assert_eq!(config.model, "vision-x");
        assert_eq!(config.timeout, Duration::from_secs(5));
        Ok(())
    }

    #[test]
    fn provider_selection_uses_registry() -> Result<()> {
        assert_eq!(select_provider(None)?, ProviderKind::OpenAi);
        assert_eq!(select_provider(Some(" Anthropic "))?, ProviderKind::Anthropic);
        assert_eq!(select_provider(Some("dryrun"))?, ProviderKind::Dryrun);

        let err = select_provider(Some("gemini")).map(|_| ()).unwrap_err();
        assert_eq!(err.to_string(), "Unknown provider 'gemini'.");
        Ok(())
    }

    #[test]
    fn api_key_flag_beats_stored_key() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let store = CredentialStore::in_dir(temp.path());
        store.save("sk-stored-0000")?;

        let flagged = resolve_api_key(Some("sk-flag-1111"), ProviderKind::OpenAi, &store)?;
        assert_eq!(flagged.as_deref(), Some("sk-flag-1111"));

        let stored = resolve_api_key(Some("  "), ProviderKind::OpenAi, &store)?;
        assert_eq!(stored.as_deref(), Some("sk-stored-0000"));
        Ok(())
    }

    #[test]
    fn dryrun_works_without_any_key() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let store = CredentialStore::in_dir(temp.path());
        let key = resolve_api_key(None, ProviderKind::Dryrun, &store)?;
        assert_eq!(key.as_deref(), Some(DRYRUN_API_KEY));
        Ok(())
    }
}
