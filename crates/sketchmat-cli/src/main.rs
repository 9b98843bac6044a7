use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use sketchmat_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use sketchmat_contracts::conversation::TurnInput;
use sketchmat_contracts::events::EventWriter;
use sketchmat_contracts::gallery::{GalleryEntry, GalleryStore, SqliteGalleryStore};
use sketchmat_contracts::image_ref::ImageReference;
use sketchmat_contracts::params::{AspectRatio, LightingPreset, ParameterUpdate};
use sketchmat_engine::{build_client, write_render, GeminiConfig, Studio, SubmitError};

const DEFAULT_DB: &str = ".sketchmat/gallery.db";

#[derive(Debug, Parser)]
#[command(name = "sketchmat", version, about = "Architectural sketch materializer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Chat(ChatArgs),
    Imagine(ImagineArgs),
    History(HistoryArgs),
    Export(ExportArgs),
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long, default_value = DEFAULT_DB)]
    db: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = "gemini")]
    provider: String,
}

#[derive(Debug, Parser)]
struct ImagineArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = "16:9")]
    aspect_ratio: String,
    #[arg(long, default_value = DEFAULT_DB)]
    db: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = "gemini")]
    provider: String,
    #[arg(long)]
    lighting: Option<String>,
    #[arg(long)]
    consistency: Option<f64>,
}

#[derive(Debug, Parser)]
struct HistoryArgs {
    #[arg(long, default_value = DEFAULT_DB)]
    db: PathBuf,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct ExportArgs {
    #[arg(long, default_value = DEFAULT_DB)]
    db: PathBuf,
    #[arg(long)]
    id: i64,
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("sketchmat error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sketchmat=info".into()),
        )
        .with_writer(io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Imagine(args) => run_imagine(args),
        Command::History(args) => run_history(args),
        Command::Export(args) => run_export(args),
    }
}

fn open_store(db: &Path) -> Result<Box<dyn GalleryStore>> {
    let store = SqliteGalleryStore::open(db)
        .with_context(|| format!("failed to open gallery at {}", db.display()))?;
    Ok(Box::new(store))
}

fn events_path(db: &Path, events: Option<PathBuf>) -> PathBuf {
    events.unwrap_or_else(|| {
        db.parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .join("events.jsonl")
    })
}

fn open_studio(db: &Path, events: Option<PathBuf>, provider: &str) -> Result<Studio> {
    let client = build_client(provider, GeminiConfig::from_env())?;
    let session_id = uuid::Uuid::new_v4().to_string();
    let writer = EventWriter::new(events_path(db, events), session_id);
    tracing::info!(
        provider = client.name(),
        db = %db.display(),
        events = %writer.path().display(),
        "session opened"
    );
    Studio::with_events(client, open_store(db)?, writer)
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let mut studio = open_studio(&args.db, args.events, &args.provider)?;
    let mut attachments: Vec<ImageReference> = Vec::new();

    let stdin = io::stdin();
    let mut line = String::new();

    println!("Sketchmat chat started. Type /help for commands.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        if intent.action == "noop" {
            continue;
        }

        match intent.action.as_str() {
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
                println!("Anything else is sent to the assistant with the pending attachments.");
            }
            "status" => print_status(&studio, attachments.len()),
            "attach" => {
                for raw in value_as_string_list(intent.command_args.get("paths")) {
                    match attachment_from_arg(&raw) {
                        Ok(reference) => {
                            match reference.mime_type() {
                                Some(mime_type) => println!("Attached inline {mime_type} image"),
                                None => println!("Attached {reference}"),
                            }
                            attachments.push(reference);
                        }
                        Err(err) => println!("Attach failed: {err:#}"),
                    }
                }
                if attachments.is_empty() {
                    println!("/attach requires one or more image paths");
                }
            }
            "clear_attachments" => {
                attachments.clear();
                println!("Attachments cleared");
            }
            "set_parameters" => match intent.parameter_update() {
                Ok(update) => match studio.update_parameters(update) {
                    Ok(()) => print_parameters(&studio),
                    Err(err) => println!("Parameters unchanged: {err}"),
                },
                Err(err) => println!("Parameters unchanged: {err}"),
            },
            "imagine" => {
                let prompt = intent.prompt.clone().unwrap_or_default();
                let ratio = value_as_non_empty_string(intent.command_args.get("aspect_ratio"))
                    .and_then(|raw| raw.parse::<AspectRatio>().ok())
                    .unwrap_or_default();
                println!("Imagining ({ratio})...");
                match studio.imagine(&prompt, ratio) {
                    Ok(id) => println!("Rendered gallery entry #{id}"),
                    Err(err) => println!("Imagine failed: {err:#}"),
                }
            }
            "history" => {
                let entries = studio.state().gallery();
                if entries.is_empty() {
                    println!("Gallery is empty");
                }
                let active = studio.state().active_gallery_id();
                for entry in entries {
                    let marker = if Some(entry.id) == active { "*" } else { " " };
                    println!("{marker} {}", format_history_line(entry));
                }
            }
            "select_history" => {
                let Some(id) = intent.command_args.get("id").and_then(Value::as_i64) else {
                    println!("/select requires a gallery id");
                    continue;
                };
                match studio.select_history(id) {
                    Ok(entry) => println!("Preview set to #{} ({})", entry.id, entry.prompt),
                    Err(err) => println!("Select failed: {err:#}"),
                }
            }
            "export" => {
                let dir = value_as_non_empty_string(intent.command_args.get("path"))
                    .unwrap_or_else(|| ".".to_string());
                match studio.export_preview(Path::new(&dir)) {
                    Ok(path) => println!("Exported {}", path.display()),
                    Err(err) => println!("Export failed: {err:#}"),
                }
            }
            "send" => {
                let text = intent.prompt.clone().unwrap_or_default();
                let turn = TurnInput::with_attachments(text, std::mem::take(&mut attachments));
                match studio.send(turn) {
                    Ok(report) => {
                        println!("sketchmat> {}", report.outcome.model_turn.text);
                        if let Some(id) = report.gallery_id {
                            println!("Saved to gallery as #{id}");
                        }
                        if let Some(error) = report.save_error {
                            println!("Render shown but not saved: {error}");
                        }
                    }
                    Err(SubmitError::EmptyInput) => println!("Nothing to send"),
                    Err(SubmitError::Busy) => println!("Still working on the previous request"),
                }
            }
            "invalid" => {
                let command = value_as_non_empty_string(intent.command_args.get("command"))
                    .unwrap_or_default();
                let error = value_as_non_empty_string(intent.command_args.get("error"))
                    .unwrap_or_default();
                println!("/{command}: {error}");
            }
            _ => print_unknown(&intent),
        }
    }

    Ok(())
}

fn run_imagine(args: ImagineArgs) -> Result<i32> {
    let ratio: AspectRatio = args.aspect_ratio.parse()?;
    let update = ParameterUpdate {
        lighting: args
            .lighting
            .as_deref()
            .map(str::parse::<LightingPreset>)
            .transpose()?,
        consistency: args.consistency,
        style_reference: None,
    };
    let mut studio = open_studio(&args.db, args.events, &args.provider)?;
    studio.update_parameters(update)?;
    let id = studio.imagine(&args.prompt, ratio)?;
    println!("{id}");
    Ok(0)
}

fn run_history(args: HistoryArgs) -> Result<i32> {
    let entries = open_store(&args.db)?.list_all()?;
    if args.json {
        let rows: Vec<Value> = entries.iter().map(history_json).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(0);
    }
    for entry in &entries {
        println!("{}", format_history_line(entry));
    }
    Ok(0)
}

fn run_export(args: ExportArgs) -> Result<i32> {
    let store = open_store(&args.db)?;
    let path = export_entry(store.as_ref(), args.id, &args.out)?;
    println!("{}", path.display());
    Ok(0)
}

fn export_entry(store: &dyn GalleryStore, id: i64, out: &Path) -> Result<PathBuf> {
    let entry = store
        .get(id)?
        .ok_or_else(|| anyhow!("no gallery entry with id {id}"))?;
    write_render(out, &entry.image_data)
}

/// `data:` URIs and `http(s)://` URLs are taken as given; anything else must
/// name an existing file.
fn attachment_from_arg(raw: &str) -> Result<ImageReference> {
    let reference = ImageReference::parse(raw);
    if let ImageReference::Handle { location } = &reference {
        let lowered = location.to_ascii_lowercase();
        let remote = lowered.starts_with("http://") || lowered.starts_with("https://");
        let path = location.strip_prefix("file://").unwrap_or(location);
        if !remote && !Path::new(path).is_file() {
            bail!("file not found ({location})");
        }
    }
    Ok(reference)
}

fn print_status(studio: &Studio, pending_attachments: usize) {
    println!("Provider: {}", studio.provider_name());
    if let Some(events) = studio.events() {
        println!(
            "Session: {} (events at {})",
            events.session_id(),
            events.path().display()
        );
    }
    print_parameters(studio);
    let state = studio.state();
    match state.active_gallery_id() {
        Some(id) => println!("Preview: gallery entry #{id}"),
        None if state.current_preview().is_some() => println!("Preview: unsaved image"),
        None => println!("Preview: none"),
    }
    println!("Gallery: {} entries", state.gallery().len());
    println!("Attachments: {pending_attachments}");
}

fn print_parameters(studio: &Studio) {
    let params = studio.state().parameters();
    println!(
        "Lighting: {} | Consistency: {:.2} | Style: {}",
        params.lighting,
        params.consistency,
        params.style_reference.as_deref().unwrap_or("none")
    );
}

fn print_unknown(intent: &Intent) {
    let command = value_as_non_empty_string(intent.command_args.get("command"))
        .unwrap_or_else(|| intent.raw.trim().to_string());
    println!("Unknown command /{command}. Type /help for commands.");
}

fn short_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..6])
}

fn format_timestamp(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn format_history_line(entry: &GalleryEntry) -> String {
    let lighting = entry
        .metadata
        .lighting
        .map(|preset| preset.label())
        .unwrap_or("-");
    let consistency = entry
        .metadata
        .consistency
        .map(|value| format!("{value:.2}"))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "#{:<4} {}  {}  {:>8}B  {} / {}  {}",
        entry.id,
        format_timestamp(entry.timestamp),
        short_digest(&entry.image_data),
        entry.image_data.len(),
        lighting,
        consistency,
        entry.prompt
    )
}

fn history_json(entry: &GalleryEntry) -> Value {
    json!({
        "id": entry.id,
        "timestamp": entry.timestamp,
        "prompt": entry.prompt,
        "bytes": entry.image_data.len(),
        "sha256": hex::encode(Sha256::digest(&entry.image_data)),
        "metadata": entry.metadata,
    })
}

fn value_as_non_empty_string(value: Option<&Value>) -> Option<String> {
    let raw = value
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

fn value_as_string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| value_as_non_empty_string(Some(item)))
                .collect()
        })
        .unwrap_or_default()
}
