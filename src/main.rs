//! vstore command line client
//!
//! Drives the storage framework directly: configuration download, node and
//! rule inspection, context management and file operations.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use vstore::communication::DownloadOutcome;
use vstore::config::{ENV_BASE_DIR, ENV_MASTER_URL};
use vstore::context::{now_ms, LatLng, Location};
use vstore::observability::init_default_logging;
use vstore::storage::FileOrdering;
use vstore::{ContextDescription, ContextFilter, VStore, VStoreConfig, VStoreEvent};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Context-aware distributed file storage client
#[derive(Parser)]
#[command(name = "vstore")]
#[command(about = "Context-aware distributed file storage client")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding the framework data
    #[arg(long, env = ENV_BASE_DIR, value_name = "DIR")]
    base_dir: Option<PathBuf>,

    /// Master node URL
    #[arg(long, env = ENV_MASTER_URL, value_name = "URL")]
    master_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the configuration, set a fixed context and count the nodes
    Demo,
    /// Configuration from the master node
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Known storage nodes
    Nodes {
        #[command(subcommand)]
        action: NodesAction,
    },
    /// Storage rules
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
    /// The current usage context
    Context {
        #[command(subcommand)]
        action: ContextAction,
    },
    /// Store a file
    Store {
        path: PathBuf,
        #[arg(long)]
        private: bool,
        /// Wait until all uploads are done
        #[arg(long)]
        wait: bool,
    },
    /// List files stored from this device
    Files {
        #[arg(long)]
        oldest_first: bool,
        #[arg(long)]
        only_pending: bool,
        #[arg(long)]
        only_private: bool,
    },
    /// Search files matching the current context
    Search {
        /// Search radius in meters
        #[arg(long)]
        radius: Option<i32>,
        /// Seconds to wait for the nodes to answer
        #[arg(long, default_value_t = 10)]
        wait_secs: u64,
    },
    /// Get a file, downloading it when it is not stored locally
    Get {
        uuid: String,
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Delete a file from all nodes and this device
    Delete { uuid: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    Download,
}

#[derive(Subcommand)]
enum NodesAction {
    Count,
    List,
    Refresh,
}

#[derive(Subcommand)]
enum RulesAction {
    List,
    Clear,
}

#[derive(Subcommand)]
enum ContextAction {
    /// Set the location context
    Set {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        #[arg(long, default_value_t = 10.0)]
        accuracy: f32,
        /// Keep the context across restarts
        #[arg(long)]
        persist: bool,
    },
    Show,
    Clear,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let store = match VStore::initialize(config).await {
        Ok(store) => store,
        Err(e) => {
            error!(code = %e.code(), "Failed to initialize vstore: {}", e);
            process::exit(1);
        }
    };

    let result = tokio::select! {
        result = run_command(&store, cli.command) => result,
        _ = shutdown_signal() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    };

    if let Err(e) = store.shutdown().await {
        warn!("Shutdown incomplete: {}", e);
    }
    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(cli: &Cli) -> CliResult<VStoreConfig> {
    let config = match find_config_file(cli.config.as_deref()) {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            let mut config = VStoreConfig::load_from_file(&path)?;
            if let Some(dir) = &cli.base_dir {
                config.storage.base_dir = dir.clone();
            }
            if let Some(url) = &cli.master_url {
                config.master.url = url.clone();
            }
            config
        }
        None => match (&cli.base_dir, &cli.master_url) {
            (Some(dir), Some(url)) => VStoreConfig::new(dir.clone(), url.clone()),
            _ => {
                return Err(
                    "No configuration file found. Provide one with -c/--config or set --base-dir and --master-url"
                        .into(),
                )
            }
        },
    };
    config.validate()?;
    Ok(config)
}

/// Explicit path first, then `./vstore.toml`, then `~/.config/vstore/vstore.toml`
fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let mut candidates = vec![PathBuf::from("vstore.toml")];
    if let Ok(home) = std::env::var("HOME") {
        candidates.push(PathBuf::from(home).join(".config/vstore/vstore.toml"));
    }
    candidates.into_iter().find(|p| p.exists())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}

async fn run_command(store: &VStore, command: Commands) -> CliResult<()> {
    match command {
        Commands::Demo => {
            let count = store.run_demo().await?;
            println!("Number of storage nodes: {count}");
        }
        Commands::Config {
            action: ConfigAction::Download,
        } => {
            if let Some(result) = store.config_manager().download(true).await {
                let update = result?;
                println!(
                    "nodes added: {}, rules stored: {}, rules deleted: {}, matching mode: {}",
                    update.nodes_added, update.rules_stored, update.rules_deleted, update.matching_mode
                );
            }
        }
        Commands::Nodes { action } => handle_nodes(store, action)?,
        Commands::Rules { action } => handle_rules(store, action)?,
        Commands::Context { action } => handle_context(store, action)?,
        Commands::Store {
            path,
            private,
            wait,
        } => {
            let mut events = store.subscribe();
            let file = store.store(&path, private).await?;
            println!("{} stored, target nodes: {:?}", file.uuid, file.stored_node_ids);
            if wait && !file.stored_node_ids.is_empty() {
                wait_for_uploads(&mut events).await;
            }
        }
        Commands::Files {
            oldest_first,
            only_pending,
            only_private,
        } => {
            let ordering = if oldest_first {
                FileOrdering::OldestFirst
            } else {
                FileOrdering::NewestFirst
            };
            for file in store.get_files_uploaded_by_this_device(ordering, only_pending, only_private)? {
                println!(
                    "{}  {:<28} {:>10}  pending={} failed={} nodes={:?}",
                    file.uuid,
                    file.descriptive_name,
                    file.file_size,
                    file.upload_pending,
                    file.upload_failed,
                    file.stored_node_ids
                );
            }
        }
        Commands::Search { radius, wait_secs } => {
            let mut filter = ContextFilter::default();
            if let Some(radius) = radius {
                filter.radius = radius;
            }
            search(store, &filter, Duration::from_secs(wait_secs)).await;
        }
        Commands::Get { uuid, dir } => match store.get_file(&uuid, dir.as_deref()).await? {
            DownloadOutcome::Ready { path, metadata } => {
                println!("{} ({}) ready at {}", metadata.descriptive_name, metadata.mime_type, path.display());
            }
            DownloadOutcome::AlreadyDownloading => println!("{uuid} is already being downloaded"),
        },
        Commands::Delete { uuid } => {
            store.delete_file(&uuid).await?;
            println!("{uuid} deleted");
        }
    }
    Ok(())
}

fn handle_nodes(store: &VStore, action: NodesAction) -> CliResult<()> {
    let nodes = store.node_manager();
    match action {
        NodesAction::Count => println!("{}", nodes.node_count()),
        NodesAction::List => {
            for node in nodes.node_list() {
                let location = node.latlng.as_ref().map(LatLng::to_string).unwrap_or_default();
                println!("{}  {:<12} {}  {}", node.uuid, node.node_type, node.base_uri(), location);
            }
        }
        NodesAction::Refresh => {
            nodes.refresh_nodes()?;
            println!("{} nodes loaded", nodes.node_count());
        }
    }
    Ok(())
}

fn handle_rules(store: &VStore, action: RulesAction) -> CliResult<()> {
    match action {
        RulesAction::List => {
            for rule in store.rule_manager().rules()? {
                println!(
                    "{}  {:<24} score={:.1} types={:?}",
                    rule.uuid,
                    rule.name,
                    rule.detail_score(),
                    rule.mime_types
                );
            }
        }
        RulesAction::Clear => {
            store.clear_rules()?;
            println!("Rules cleared");
        }
    }
    Ok(())
}

fn handle_context(store: &VStore, action: ContextAction) -> CliResult<()> {
    match action {
        ContextAction::Set {
            lat,
            lng,
            accuracy,
            persist,
        } => {
            let location = Location::new(
                LatLng::new(lat, lng),
                accuracy,
                now_ms(),
                "",
            );
            store.provide_context(ContextDescription::with_location(location));
            if persist {
                store.persist_context(true)?;
            }
        }
        ContextAction::Show => println!("{}", store.current_context().to_json()),
        ContextAction::Clear => store.clear_current_context(false)?,
    }
    Ok(())
}

async fn wait_for_uploads(events: &mut broadcast::Receiver<VStoreEvent>) {
    loop {
        match events.recv().await {
            Ok(VStoreEvent::SingleUploadDone { file_id, node_id }) => {
                println!("{file_id} uploaded to {node_id}");
            }
            Ok(VStoreEvent::UploadFailedPermanently {
                file_id, reason, ..
            }) => {
                println!("{file_id} failed permanently: {reason}");
            }
            Ok(VStoreEvent::UploadFailed { file_id, node_id }) => {
                println!("{file_id} upload to {node_id} failed, will retry on next start");
            }
            Ok(VStoreEvent::AllUploadsDone) => break,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Missed upload events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn search(store: &VStore, filter: &ContextFilter, wait: Duration) {
    let mut events = store.subscribe();
    let Some(handle) = store.search_files(&store.current_context(), filter, "") else {
        println!("No storage nodes known");
        return;
    };
    let request_id = handle.request_id.clone();

    match tokio::time::timeout(wait, handle.join()).await {
        Ok(total) => println!("{total} files found"),
        Err(_) => println!("Search timed out, showing answers received so far"),
    }

    loop {
        match events.try_recv() {
            Ok(VStoreEvent::NewFilesMatchingContext {
                node_id,
                request_id: id,
                files,
            }) if id == request_id => {
                for file in files {
                    println!("{}  {:<28} {}  on {node_id}", file.uuid, file.descriptive_name, file.mime_type);
                }
            }
            Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
}
