//! scrib CLI - scratch tabs and clipboard history from the terminal
//!
//! Quick capture with minimal friction, plus control over cross-device sync.

mod cli;

use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{CommandFactory, Parser};
use clap_complete::aot::Generator;
use clap_complete::{generate, shells};
use scrib_core::config::SyncSettings;
use scrib_core::models::Document;
use scrib_core::store::{FileStore, LocalStore};
use scrib_core::sync::{SchedulerConfig, SyncService};
use scrib_core::transport::{BlobTransport, HttpKvStore, MemoryKv, RemoteKv, RemoteTransport};
use scrib_core::{ClipEntry, Tab};
use serde::Serialize;
use thiserror::Error;

use cli::{Cli, ClipCommands, Commands, CompletionShell, SyncCommands, TabCommands};

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] scrib_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No content provided")]
    EmptyContent,
    #[error("ID cannot be empty")]
    EmptyId,
    #[error("Not found for id/prefix: {0}")]
    NotFound(String),
    #[error("{0}")]
    AmbiguousId(String),
    #[error(
        "Sync is not configured. Run `scrib sync enable --endpoint <URL>` or set SCRIB_REMOTE_URL."
    )]
    SyncNotConfigured,
    #[error("Sync is disabled. Run `scrib sync enable` first.")]
    SyncDisabled,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("scrib=info".parse().unwrap()),
        )
        .init();

    let args = Cli::parse();
    let data_dir = resolve_data_dir(args.data_dir);

    match args.command {
        Some(Commands::Tab { command }) => run_tab(command, &data_dir).await?,
        Some(Commands::Clip { command }) => run_clip(command, &data_dir).await?,
        Some(Commands::Sync { command }) => run_sync(command, &data_dir).await?,
        Some(Commands::Completions { shell, output }) => {
            run_completions(shell, output.as_deref())?;
        }
        None => {
            // Quick capture mode: scrib "my scratch text"
            if args.text.is_empty() {
                Cli::command().print_help().map_err(CliError::Io)?;
                println!();
            } else {
                run_tab(
                    TabCommands::Add {
                        content: args.text,
                        name: None,
                        language: None,
                    },
                    &data_dir,
                )
                .await?;
            }
        }
    }

    Ok(())
}

async fn run_tab(command: TabCommands, data_dir: &Path) -> Result<(), CliError> {
    let (service, _settings) = open_service(data_dir)?;
    service.load_local().await?;
    let engine = service.tabs().engine();

    match command {
        TabCommands::Add {
            content,
            name,
            language,
        } => {
            let text = normalize_content(&content.join(" ")).ok_or(CliError::EmptyContent)?;
            let mut tab = Tab::new(name.unwrap_or_else(|| derive_name(&text)), text);
            if let Some(language) = language {
                tab.language = language;
            }
            let id = engine.upsert(tab).await;
            engine.flush_now().await?;
            println!("{id}");
        }
        TabCommands::List { limit, json } => {
            let tabs = engine.list().await;
            let tabs = &tabs[..tabs.len().min(limit)];
            if json {
                let items: Vec<TabListItem> = tabs.iter().map(tab_to_list_item).collect();
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                for line in format_tab_lines(tabs) {
                    println!("{line}");
                }
            }
        }
        TabCommands::Show { id } => {
            let tab = resolve_doc(&engine.list().await, &id)?;
            println!("{}", tab.text);
        }
        TabCommands::Rm { id } => {
            let tab = resolve_doc(&engine.list().await, &id)?;
            engine.record_deleted(tab.id).await;
            engine.flush_now().await?;
            println!("{}", tab.id);
        }
    }

    Ok(())
}

async fn run_clip(command: ClipCommands, data_dir: &Path) -> Result<(), CliError> {
    let (service, _settings) = open_service(data_dir)?;
    service.load_local().await?;
    let engine = service.clipboard().engine();

    match command {
        ClipCommands::Add { content } => {
            let text = normalize_content(&content.join(" ")).ok_or(CliError::EmptyContent)?;
            // Append path: one remote read-modify-write, no full snapshot.
            let id = engine.capture(ClipEntry::new(text)).await;
            engine.persist_now().await?;
            println!("{id}");
        }
        ClipCommands::List { limit, json } => {
            let clips = engine.list().await;
            let clips = &clips[..clips.len().min(limit)];
            if json {
                let items: Vec<ClipListItem> = clips.iter().map(clip_to_list_item).collect();
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                for line in format_clip_lines(clips) {
                    println!("{line}");
                }
            }
        }
        ClipCommands::Rm { id } => {
            let clip = resolve_doc(&engine.list().await, &id)?;
            engine.record_deleted(clip.id).await;
            engine.flush_now().await?;
            println!("{}", clip.id);
        }
    }

    Ok(())
}

async fn run_sync(command: SyncCommands, data_dir: &Path) -> Result<(), CliError> {
    match command {
        SyncCommands::Now => {
            let (service, settings) = open_service(data_dir)?;
            if !has_remote(&settings) {
                return Err(CliError::SyncNotConfigured);
            }
            if !settings.enabled {
                return Err(CliError::SyncDisabled);
            }
            service.load_local().await?;
            service.sync_now().await?;
            println!("Sync completed");
        }
        SyncCommands::Status { json } => {
            let (service, settings) = open_service(data_dir)?;
            service.load_local().await?;
            print_status(&service, &settings, json).await?;
        }
        SyncCommands::Enable { endpoint } => {
            let store = open_store(data_dir)?;
            let mut settings = SyncSettings::load(&store);
            if let Some(endpoint) = endpoint {
                settings.endpoint = Some(endpoint);
            }
            if settings.endpoint().is_none() {
                settings.endpoint = env::var("SCRIB_REMOTE_URL").ok();
            }
            if !has_remote(&settings) {
                return Err(CliError::SyncNotConfigured);
            }
            settings.enabled = true;
            settings.save(&store)?;

            let (service, _settings) = open_service(data_dir)?;
            service.load_local().await?;
            service.sync_now().await?;
            println!("Sync enabled");
        }
        SyncCommands::Disable => {
            let (service, mut settings) = open_service(data_dir)?;
            let had_remote = has_remote(&settings);
            settings.enabled = false;
            let store = open_store(data_dir)?;
            settings.save(&store)?;

            if had_remote {
                // Unsync: remote state is removed, local data stays.
                service.tabs().engine().clear_remote().await?;
                service.clipboard().engine().clear_remote().await?;
            }
            println!("Sync disabled");
        }
        SyncCommands::Watch => {
            let (service, settings) = open_service(data_dir)?;
            if !has_remote(&settings) {
                return Err(CliError::SyncNotConfigured);
            }
            if !settings.enabled {
                return Err(CliError::SyncDisabled);
            }
            service.load_local().await?;
            service.enable().await;
            println!("Syncing every {}s; Ctrl-C to stop", settings.poll_interval_secs);
            tokio::signal::ctrl_c().await?;
            println!("Stopped");
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusReport {
    settings: SyncSettings,
    tabs: scrib_core::sync::SyncStatus,
    clipboard: scrib_core::sync::SyncStatus,
    tab_count: usize,
    clip_count: usize,
    tab_tombstones: usize,
    clip_tombstones: usize,
}

async fn print_status(
    service: &SyncService,
    settings: &SyncSettings,
    json: bool,
) -> Result<(), CliError> {
    let report = StatusReport {
        settings: settings.clone(),
        tabs: service.tabs().status(),
        clipboard: service.clipboard().status(),
        tab_count: service.tabs().engine().list().await.len(),
        clip_count: service.clipboard().engine().list().await.len(),
        tab_tombstones: service.tabs().engine().tombstones().await.len(),
        clip_tombstones: service.clipboard().engine().tombstones().await.len(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Sync: {}",
            if report.settings.enabled {
                "enabled"
            } else {
                "disabled"
            }
        );
        println!(
            "Endpoint: {}",
            report.settings.endpoint().as_deref().unwrap_or("(none)")
        );
        println!(
            "Tabs: {} ({} tombstones)",
            report.tab_count, report.tab_tombstones
        );
        println!(
            "Clipboard: {} ({} tombstones)",
            report.clip_count, report.clip_tombstones
        );
    }
    Ok(())
}

fn run_completions(shell: CompletionShell, output_path: Option<&Path>) -> Result<(), CliError> {
    let mut command = Cli::command();
    let mut buffer = Vec::new();

    match shell {
        CompletionShell::Bash => generate_for_shell(shells::Bash, &mut command, &mut buffer),
        CompletionShell::Zsh => generate_for_shell(shells::Zsh, &mut command, &mut buffer),
        CompletionShell::Fish => generate_for_shell(shells::Fish, &mut command, &mut buffer),
    }

    if let Some(path) = output_path {
        std::fs::write(path, &buffer)?;
        println!("{}", path.display());
    } else {
        io::stdout().write_all(&buffer)?;
    }

    Ok(())
}

fn generate_for_shell<G: Generator>(
    generator: G,
    command: &mut clap::Command,
    buffer: &mut Vec<u8>,
) {
    generate(generator, command, "scrib", buffer);
}

fn open_store(data_dir: &Path) -> Result<FileStore, CliError> {
    Ok(FileStore::open(data_dir)?)
}

/// Build the sync service for this data directory.
///
/// Without a configured endpoint the transports are inert in-memory stubs;
/// local commands never contact them and sync commands refuse to run.
fn open_service(data_dir: &Path) -> Result<(SyncService, SyncSettings), CliError> {
    let store = open_store(data_dir)?;
    let mut settings = SyncSettings::load(&store);
    if settings.endpoint().is_none() {
        settings.endpoint = env::var("SCRIB_REMOTE_URL").ok();
    }

    let (tab_transport, clip_transport): (
        Arc<dyn RemoteTransport<Tab>>,
        Arc<dyn RemoteTransport<ClipEntry>>,
    ) = match settings.endpoint() {
        Some(endpoint) => {
            let kv: Arc<dyn RemoteKv> = Arc::new(HttpKvStore::new(endpoint)?);
            (
                Arc::new(BlobTransport::new(Arc::clone(&kv))),
                Arc::new(BlobTransport::new(kv)),
            )
        }
        None => {
            let kv: Arc<dyn RemoteKv> = Arc::new(MemoryKv::new());
            (
                Arc::new(BlobTransport::new(Arc::clone(&kv))),
                Arc::new(BlobTransport::new(kv)),
            )
        }
    };

    let config = SchedulerConfig {
        poll_interval: std::time::Duration::from_secs(settings.poll_interval_secs.max(5)),
        ..SchedulerConfig::default()
    };
    let service = SyncService::new(
        Arc::new(store) as Arc<dyn LocalStore>,
        tab_transport,
        clip_transport,
        config,
    );

    if settings.enabled && settings.endpoint().is_some() {
        service.tabs().engine().set_enabled(true);
        service.clipboard().engine().set_enabled(true);
    }

    Ok((service, settings))
}

fn has_remote(settings: &SyncSettings) -> bool {
    settings.endpoint().is_some()
}

fn resolve_doc<D: Document>(docs: &[D], query: &str) -> Result<D, CliError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(CliError::EmptyId);
    }

    let matching: Vec<&D> = docs
        .iter()
        .filter(|doc| doc.id().to_string().starts_with(query))
        .collect();

    match matching.len() {
        0 => Err(CliError::NotFound(query.to_string())),
        1 => Ok(matching[0].clone()),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|doc| doc.id().to_string().chars().take(13).collect::<String>())
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

#[derive(Debug, Serialize)]
struct TabListItem {
    id: String,
    name: String,
    preview: String,
    language: String,
    created_at: i64,
    last_modified: i64,
    relative_time: String,
}

#[derive(Debug, Serialize)]
struct ClipListItem {
    id: String,
    text: String,
    created_at: i64,
    last_modified: i64,
    relative_time: String,
}

fn tab_to_list_item(tab: &Tab) -> TabListItem {
    let now_ms = Utc::now().timestamp_millis();
    TabListItem {
        id: tab.id.to_string(),
        name: tab.name.clone(),
        preview: line_preview(&tab.text, 80),
        language: tab.language.clone(),
        created_at: tab.created_at,
        last_modified: tab.last_modified,
        relative_time: format_relative_time(tab.last_modified, now_ms),
    }
}

fn clip_to_list_item(clip: &ClipEntry) -> ClipListItem {
    let now_ms = Utc::now().timestamp_millis();
    ClipListItem {
        id: clip.id.to_string(),
        text: clip.text.clone(),
        created_at: clip.created_at,
        last_modified: clip.last_modified,
        relative_time: format_relative_time(clip.last_modified, now_ms),
    }
}

fn format_tab_lines(tabs: &[Tab]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    tabs.iter()
        .map(|tab| {
            let id = tab.id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            let preview = line_preview(&tab.text, 40);
            let relative_time = format_relative_time(tab.last_modified, now_ms);
            format!("{short_id:<13}  {:<16}  {preview:<40}  {relative_time}", tab.name)
        })
        .collect()
}

fn format_clip_lines(clips: &[ClipEntry]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    clips
        .iter()
        .map(|clip| {
            let id = clip.id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            let preview = line_preview(&clip.text, 40);
            let relative_time = format_relative_time(clip.last_modified, now_ms);
            format!("{short_id:<13}  {preview:<40}  {relative_time}")
        })
        .collect()
}

fn line_preview(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

fn derive_name(text: &str) -> String {
    let name = line_preview(text, 24);
    if name.is_empty() {
        "Scratch".to_string()
    } else {
        name
    }
}

fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn resolve_data_dir(cli_data_dir: Option<PathBuf>) -> PathBuf {
    cli_data_dir
        .or_else(|| env::var_os("SCRIB_DATA_DIR").map(PathBuf::from))
        .unwrap_or_else(default_data_dir)
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scrib")
}
