use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use atelier_contracts::request::{mime_for_url, GenerationKind, GenerationRequest, MediaRef};
use atelier_engine::finalize::sniff_content_type;
use atelier_engine::{CancelToken, Config, JobTicket, OrchestrationError, Orchestrator};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "atelier", version, about = "Generation job orchestration CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the compiled provider payload without sending it.
    Compile(RequestArgs),
    /// Run a request to completion and print the stored artifact.
    Generate(RequestArgs),
    /// Start a request; async targets return a ticket for `status`.
    Submit(RequestArgs),
    /// Check a ticket returned by `submit` or a timed-out `generate`.
    Status(StatusArgs),
    /// List targets and whether their provider family is configured.
    Targets,
}

#[derive(Debug, Args)]
struct RequestArgs {
    /// JSON request file; flags below override its fields.
    #[arg(long)]
    request_file: Option<PathBuf>,
    #[arg(long)]
    kind: Option<String>,
    #[arg(long)]
    prompt: Option<String>,
    #[arg(long)]
    negative: Option<String>,
    /// Tuning parameter as key=value; values are parsed as JSON when possible.
    #[arg(long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,
    /// Base media: file path, URL or data URI. Repeatable.
    #[arg(long)]
    base: Vec<String>,
    #[arg(long)]
    mask: Option<String>,
    #[arg(long)]
    audio: Option<String>,
    #[arg(long)]
    owner: Option<String>,
    #[arg(long)]
    target: Option<String>,
}

#[derive(Debug, Args)]
struct StatusArgs {
    /// Ticket JSON, or @path to read it from a file.
    #[arg(long)]
    ticket: String,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("atelier error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let families: Vec<&str> = config.pools.iter().map(|pool| pool.family()).collect();
    tracing::debug!(?families, "configuration loaded");
    let orchestrator = Orchestrator::from_config(config)?;
    match cli.command {
        Command::Compile(args) => {
            let request = build_request(&args)?;
            let plan = orchestrator.plan(&request, args.target.as_deref())?;
            print_json(&json!({
                "target": plan.selection.target.name,
                "fallback_reason": plan.selection.fallback_reason(),
                "instruction": plan.payload.instruction,
                "provider_request": plan.payload.provider_request(),
                "missing_fields": plan.payload.missing_fields(),
                "ignored_params": plan.payload.ignored_params,
                "warnings": plan.payload.warnings,
            }))?;
            Ok(0)
        }
        Command::Generate(args) => {
            let request = build_request(&args)?;
            match orchestrator.generate(&request, args.target.as_deref(), &CancelToken::new()) {
                Ok(generation) => {
                    print_json(&serde_json::to_value(&generation)?)?;
                    Ok(0)
                }
                Err(err) => report_failure(&err),
            }
        }
        Command::Submit(args) => {
            let request = build_request(&args)?;
            match orchestrator.submit(&request, args.target.as_deref()) {
                Ok(submission) => {
                    print_json(&serde_json::to_value(&submission)?)?;
                    Ok(0)
                }
                Err(err) => report_failure(&err),
            }
        }
        Command::Status(args) => {
            let ticket = read_ticket(&args.ticket)?;
            let report = orchestrator.check(&ticket)?;
            print_json(&serde_json::to_value(&report)?)?;
            Ok(if report.error.is_some() { 1 } else { 0 })
        }
        Command::Targets => {
            let rows: Vec<Value> = orchestrator
                .registry()
                .list()
                .map(|target| {
                    json!({
                        "name": target.name,
                        "family": target.family,
                        "mode": target.mode,
                        "kinds": target.kinds.iter().map(GenerationKind::label).collect::<Vec<_>>(),
                        "available": orchestrator.is_family_available(&target.family),
                    })
                })
                .collect();
            print_json(&Value::Array(rows))?;
            Ok(0)
        }
    }
}

/// Timeouts print the retained handle so the job can still be checked.
fn report_failure(err: &OrchestrationError) -> Result<i32> {
    if err.is_rate_limited() {
        eprintln!("atelier: provider rate limit reached, retry later ({err})");
        return Ok(3);
    }
    if let Some(ticket) = err.ticket() {
        eprintln!("atelier: {err}; the job may still finish, check it with `atelier status --ticket`");
        print_json(&timed_out_output(ticket)?)?;
        return Ok(2);
    }
    eprintln!("atelier error: {err}");
    Ok(1)
}

/// The ticket fields plus `"status": "timed_out"`, readable by `status`.
fn timed_out_output(ticket: &JobTicket) -> Result<Value> {
    let mut value = serde_json::to_value(ticket)?;
    if let Value::Object(map) = &mut value {
        map.insert("status".to_string(), json!("timed_out"));
    }
    Ok(value)
}

fn build_request(args: &RequestArgs) -> Result<GenerationRequest> {
    let mut request = match &args.request_file {
        Some(path) => {
            let raw = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str::<GenerationRequest>(&raw)
                .with_context(|| format!("invalid request in {}", path.display()))?
        }
        None => {
            let Some(kind) = args.kind.as_deref() else {
                bail!("--kind is required without --request-file");
            };
            GenerationRequest::new(GenerationKind::parse(kind), "")
        }
    };

    if let Some(kind) = args.kind.as_deref() {
        request.kind = GenerationKind::parse(kind);
    }
    if let Some(prompt) = &args.prompt {
        request.prompt = prompt.clone();
    }
    if let Some(negative) = &args.negative {
        request.negative_prompt = Some(negative.clone());
    }
    if let Some(owner) = &args.owner {
        request.owner = Some(owner.clone());
    }
    for raw in &args.base {
        request.inputs.base.push(load_media(raw)?);
    }
    if let Some(raw) = &args.mask {
        request.inputs.mask = Some(load_media(raw)?);
    }
    if let Some(raw) = &args.audio {
        request.inputs.audio = Some(load_media(raw)?);
    }
    for raw in &args.params {
        let Some((key, value)) = raw.split_once('=') else {
            bail!("--param expects KEY=VALUE, got '{raw}'");
        };
        let value = serde_json::from_str::<Value>(value.trim())
            .unwrap_or_else(|_| Value::String(value.trim().to_string()));
        request.params.insert(key.trim().to_string(), value);
    }
    Ok(request)
}

/// URLs and data URIs pass through; anything else is read as a local file.
fn load_media(raw: &str) -> Result<MediaRef> {
    let trimmed = raw.trim();
    if trimmed.starts_with("data:") || trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Ok(MediaRef::parse(trimmed));
    }
    let path = Path::new(trimmed);
    let bytes = fs::read(path).with_context(|| format!("failed to read media {}", path.display()))?;
    let mime = sniff_content_type(&bytes)
        .or_else(|| mime_for_url(trimmed))
        .unwrap_or("application/octet-stream");
    Ok(MediaRef::from_bytes(mime, &bytes))
}

fn read_ticket(raw: &str) -> Result<JobTicket> {
    let text = match raw.strip_prefix('@') {
        Some(path) => fs::read_to_string(path).with_context(|| format!("failed to read ticket {path}"))?,
        None => raw.to_string(),
    };
    let value: Value = serde_json::from_str(&text).context("ticket is not valid JSON")?;
    // `submit` and a timed-out `generate` add a `status` field to the ticket.
    serde_json::from_value::<JobTicket>(value).context("ticket is missing handle, target or media")
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
