use clap::{Parser, Subcommand, ValueEnum};
use pomoblock_calendar::application::commands::{
    add_event_impl, add_source_impl, delete_event_impl, export_events_impl, import_from_text_impl,
    import_from_url_impl, list_events_impl, list_sources_impl, remove_source_impl,
    resume_auto_sync_impl, set_auto_sync_impl, set_sync_interval_impl, sync_status_impl,
    trigger_manual_sync_impl, AppState,
};
use pomoblock_calendar::infrastructure::error::InfraError;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::time::{interval, Duration, MissedTickBehavior};

const WATCH_STATUS_SECONDS: u64 = 60;

#[derive(Parser)]
#[command(name = "pomoblock-calendar")]
#[command(about = "Pull public calendar feeds into the local PomoBlock event list")]
struct Cli {
    /// Workspace directory holding config/, state/ and logs/ (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one synchronization pass over every configured source
    Sync,
    /// Import events from a JSON, CSV or ICS file
    Import {
        file: PathBuf,
        /// Format name; guessed from the file extension when omitted
        #[arg(short, long)]
        format: Option<String>,
    },
    /// Import a remote calendar once without registering it as a source
    ImportUrl { url: String },
    /// Export all events as JSON
    Export {
        /// Destination file (defaults to calendar-events-<date>.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Manage calendar sources
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },
    /// Manage stored events
    Events {
        #[command(subcommand)]
        action: EventAction,
    },
    /// Turn auto-sync on or off
    AutoSync { state: Toggle },
    /// Set the auto-sync interval in minutes
    Interval { minutes: i64 },
    /// Show sync settings and the last status
    Status,
    /// Keep auto-sync running until interrupted
    Watch,
}

#[derive(Subcommand)]
enum SourceAction {
    Add {
        url: String,
        #[arg(short, long)]
        name: Option<String>,
    },
    Remove { id: String },
    List,
}

#[derive(Subcommand)]
enum EventAction {
    List,
    Add {
        name: String,
        /// Calendar date as YYYY-MM-DD
        date: String,
        #[arg(short = 't', long = "type")]
        event_type: Option<String>,
        #[arg(long)]
        recurring: bool,
    },
    Delete { id: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let workspace_root = match cli.root {
        Some(root) => root,
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(error) => {
                eprintln!("failed to resolve current directory: {error}");
                return ExitCode::FAILURE;
            }
        },
    };
    let keep_timer = matches!(cli.command, Commands::Watch);
    let state = match AppState::new(workspace_root) {
        Ok(state) => state.with_timer(keep_timer),
        Err(error) => {
            eprintln!("failed to initialize workspace: {error}");
            return ExitCode::FAILURE;
        }
    };

    let (name, result) = run(&state, cli.command).await;
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{}", state.command_error(name, &error));
            ExitCode::FAILURE
        }
    }
}

async fn run(state: &AppState, command: Commands) -> (&'static str, Result<(), InfraError>) {
    match command {
        Commands::Sync => ("sync", cmd_sync(state).await),
        Commands::Import { file, format } => ("import", cmd_import(state, file, format).await),
        Commands::ImportUrl { url } => ("import_url", cmd_import_url(state, url).await),
        Commands::Export { output } => ("export", cmd_export(state, output)),
        Commands::Source { action } => ("source", cmd_source(state, action).await),
        Commands::Events { action } => ("events", cmd_events(state, action).await),
        Commands::AutoSync { state: toggle } => {
            ("auto_sync", cmd_auto_sync(state, matches!(toggle, Toggle::On)).await)
        }
        Commands::Interval { minutes } => ("interval", cmd_interval(state, minutes).await),
        Commands::Status => ("status", cmd_status(state)),
        Commands::Watch => ("watch", cmd_watch(state).await),
    }
}

async fn cmd_sync(state: &AppState) -> Result<(), InfraError> {
    let response = trigger_manual_sync_impl(state).await?;
    println!("{}", response.message);
    for error in &response.errors {
        println!("  {}: {}", error.source, error.message);
    }
    Ok(())
}

async fn cmd_import(state: &AppState, file: PathBuf, format: Option<String>) -> Result<(), InfraError> {
    let content = fs::read_to_string(&file)?;
    let hint = format.unwrap_or_else(|| file.display().to_string());
    let outcome = import_from_text_impl(state, content, hint).await?;
    println!(
        "Successfully imported {} events ({} duplicate(s) skipped)",
        outcome.imported, outcome.duplicates
    );
    Ok(())
}

async fn cmd_import_url(state: &AppState, url: String) -> Result<(), InfraError> {
    let outcome = import_from_url_impl(state, url).await?;
    println!(
        "Successfully imported {} events from calendar ({} duplicate(s) skipped)",
        outcome.imported, outcome.duplicates
    );
    Ok(())
}

fn cmd_export(state: &AppState, output: Option<PathBuf>) -> Result<(), InfraError> {
    let export = export_events_impl(state)?;
    let path = output.unwrap_or_else(|| PathBuf::from(&export.file_name));
    fs::write(&path, format!("{}\n", export.content))?;
    println!("Exported {} event(s) to {}", export.count, path.display());
    Ok(())
}

async fn cmd_source(state: &AppState, action: SourceAction) -> Result<(), InfraError> {
    match action {
        SourceAction::Add { url, name } => {
            let response = add_source_impl(state, url, name).await?;
            if response.added {
                println!("Added {} ({})", response.source.name, response.source.id);
            } else {
                println!("Already configured as {} ({})", response.source.name, response.source.id);
            }
        }
        SourceAction::Remove { id } => {
            if remove_source_impl(state, id.clone()).await? {
                println!("Removed {id}");
            } else {
                println!("No source with id {id}");
            }
        }
        SourceAction::List => {
            let sources = list_sources_impl(state)?;
            if sources.is_empty() {
                println!("No calendars added.");
            }
            for source in sources {
                println!("{}\t{}\t{}", source.id, source.name, source.url);
            }
        }
    }
    Ok(())
}

async fn cmd_events(state: &AppState, action: EventAction) -> Result<(), InfraError> {
    match action {
        EventAction::List => {
            for event in list_events_impl(state)? {
                println!(
                    "{}\t{}\t{}\t{}",
                    event.date,
                    event.event_type.as_str(),
                    event.name,
                    event.id
                );
            }
        }
        EventAction::Add {
            name,
            date,
            event_type,
            recurring,
        } => {
            let event = add_event_impl(state, name, date, event_type, recurring.then_some(true)).await?;
            println!("Added {} on {} ({})", event.name, event.date, event.id);
        }
        EventAction::Delete { id } => {
            if delete_event_impl(state, id.clone()).await? {
                println!("Deleted {id}");
            } else {
                println!("No event with id {id}");
            }
        }
    }
    Ok(())
}

async fn cmd_auto_sync(state: &AppState, enabled: bool) -> Result<(), InfraError> {
    let status = set_auto_sync_impl(state, enabled).await?;
    println!(
        "Auto-sync {} (every {} minute(s))",
        if status.enabled { "enabled" } else { "disabled" },
        status.interval_minutes
    );
    if status.enabled && status.source_count > 0 {
        cmd_sync(state).await?;
        println!("Run `pomoblock-calendar watch` to keep syncing in the background.");
    }
    Ok(())
}

async fn cmd_interval(state: &AppState, minutes: i64) -> Result<(), InfraError> {
    let minutes = set_sync_interval_impl(state, minutes).await?;
    println!("Sync interval set to {minutes} minute(s)");
    Ok(())
}

fn cmd_status(state: &AppState) -> Result<(), InfraError> {
    let status = sync_status_impl(state)?;
    println!("{} calendar sync", status.app_name);
    println!("Auto-sync:  {}", if status.enabled { "on" } else { "off" });
    println!("Interval:   {} minute(s)", status.interval_minutes);
    println!("Calendars:  {}", status.source_count);
    println!("Last sync:  {}", status.last_sync_description);
    Ok(())
}

async fn cmd_watch(state: &AppState) -> Result<(), InfraError> {
    if !resume_auto_sync_impl(state)? {
        let status = sync_status_impl(state)?;
        println!(
            "{}",
            if status.enabled {
                "No calendars configured"
            } else {
                "Auto-sync disabled"
            }
        );
        return Ok(());
    }

    let mut ticker = interval(Duration::from_secs(WATCH_STATUS_SECONDS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_printed = String::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Stopping auto-sync");
                return Ok(());
            }
            _ = ticker.tick() => {
                let message = state.status_message();
                if message != last_printed {
                    println!("{message}");
                    last_printed = message;
                }
            }
        }
    }
}
