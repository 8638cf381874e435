mod config;
mod database;
mod entities;
mod error;
mod http_server;
mod logging;
mod models;
mod ports;
mod provider;
mod providers;
mod services;
#[cfg(test)]
mod test_utils;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::{Result, eyre::Context};

use crate::{
    config::Config,
    database::Database,
    http_server::state::AppState,
    logging::{LogFormat, init_tracing},
    provider::Provider,
    providers::ProviderRegistry,
    services::{
        background::run_background_tasks,
        hub::LibraryHub,
        library_view::{SortKey, Tab, filter_albums, filter_playlists},
    },
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The config file to use
    #[arg(short, long, env = "MUSIC_LIBRARY_HUB_CONFIG")]
    config: Option<PathBuf>,

    /// Database file, overriding the config file
    #[arg(long, env = "MUSIC_LIBRARY_HUB_DATABASE", global = true)]
    database: Option<PathBuf>,

    /// Tracing filter, e.g. `info` or `music_library_hub=debug`
    #[arg(long, default_value = "info", global = true, env = "LOG_LEVEL")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true, env = "LOG_FORMAT")]
    log_format: LogFormat,

    /// OTLP gRPC endpoint to export traces to
    #[arg(long, global = true, env = "OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// The port to run the server on
        #[arg(short, long, default_value = "3000", env = "MUSIC_LIBRARY_HUB_HTTP_PORT")]
        port: u16,
    },
    /// Print the URL that links a streaming account
    Connect {
        #[arg(value_enum)]
        provider: Provider,
        #[arg(short, long, env = "MUSIC_LIBRARY_HUB_USER")]
        user: String,
    },
    /// Finish linking with the code and state from the provider redirect
    Callback {
        #[arg(value_enum)]
        provider: Provider,
        #[arg(long)]
        code: String,
        #[arg(long)]
        state: String,
    },
    /// Re-sync a linked library now
    Sync {
        #[arg(value_enum)]
        provider: Provider,
        #[arg(short, long, env = "MUSIC_LIBRARY_HUB_USER")]
        user: String,
    },
    /// Print a synced library
    Library {
        #[arg(value_enum)]
        provider: Provider,
        #[arg(short, long, env = "MUSIC_LIBRARY_HUB_USER")]
        user: String,
        /// Filter albums by name or artist, playlists by name
        #[arg(short, long)]
        search: Option<String>,
        #[arg(long, value_enum, default_value_t = SortKey::NameAsc)]
        sort: SortKey,
        #[arg(long, value_enum, default_value_t = Tab::Albums)]
        tab: Tab,
    },
    /// Show which services a user has linked
    Status {
        #[arg(short, long, env = "MUSIC_LIBRARY_HUB_USER")]
        user: String,
    },
    /// Unlink a streaming account and drop its library
    Disconnect {
        #[arg(value_enum)]
        provider: Provider,
        #[arg(short, long, env = "MUSIC_LIBRARY_HUB_USER")]
        user: String,
    },
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Create a default config file, if it doesn't exist
    CreateDefault,
    /// Print the path to the config file
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let tracer_provider = init_tracing(
        "music-library-hub",
        args.otlp_endpoint.as_deref(),
        &args.log_level,
        args.log_format,
    )?;

    let result = run(args).await;

    if let Some(tracer_provider) = tracer_provider
        && let Err(e) = tracer_provider.shutdown()
    {
        eprintln!("Failed to flush traces: {e}");
    }
    result
}

async fn open_hub(config: &Config) -> Result<Arc<LibraryHub>> {
    let database = Arc::new(Database::open(&config.database_path()).await?);
    let registry = ProviderRegistry::from_config(config)?;
    let hub = Arc::new(LibraryHub::new(database, registry, config));
    hub.hydrate().await?;
    Ok(hub)
}

async fn run(args: Args) -> Result<()> {
    tracing::debug!("Loading configuration");
    let mut config = match &args.config {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    }
    .wrap_err("Failed to load music-library-hub config")?;
    if let Some(database) = &args.database {
        config.set_database(database);
    }

    match args.command {
        Commands::Serve { port } => {
            let hub = open_hub(&config).await?;
            let _refresh = run_background_tasks(
                hub.clone(),
                Duration::from_secs(config.periodic_refresh_secs),
                config.staleness_window(),
            );
            let app_state = Arc::new(AppState {
                hub,
                staleness_window: config.staleness_window(),
            });
            http_server::app::start(port, app_state).await?;
        }
        Commands::Connect { provider, user } => {
            let hub = open_hub(&config).await?;
            let url = hub.begin_authorization(&user, provider)?;
            println!("Open this URL to connect {}:", provider.display_name());
            println!("{url}");
        }
        Commands::Callback {
            provider,
            code,
            state,
        } => {
            let hub = open_hub(&config).await?;
            match hub.complete_authorization(provider, &code, &state).await? {
                Some(summary) => println!(
                    "Connected {}: {} albums, {} playlists",
                    provider.display_name(),
                    summary.albums,
                    summary.playlists
                ),
                None => println!(
                    "Connected {}, but the first sync failed. Run `sync` to try again.",
                    provider.display_name()
                ),
            }
        }
        Commands::Sync { provider, user } => {
            let hub = open_hub(&config).await?;
            let summary = hub.sync_library(&user, provider).await?;
            println!(
                "Synced {}: {} albums, {} playlists ({} skipped)",
                provider.display_name(),
                summary.albums,
                summary.playlists,
                summary.skipped
            );
        }
        Commands::Library {
            provider,
            user,
            search,
            sort,
            tab,
        } => {
            let hub = open_hub(&config).await?;
            let read = hub
                .library(&user, provider, config.staleness_window())
                .await?;
            if let Some(refresh) = read.refresh
                && let Err(error) = refresh.await.wrap_err("Library sync task failed")?
            {
                if read.cached.is_none() {
                    return Err(error.into());
                }
                tracing::warn!("Showing the cached library, refresh failed: {}", error);
            }
            let Some(cached) = hub.cache().get(&user, provider) else {
                println!("No {} library yet. Run `sync` first.", provider.display_name());
                return Ok(());
            };

            let snapshot = &cached.snapshot;
            println!(
                "{} library, last synced {}",
                provider.display_name(),
                snapshot.last_synced_at.to_rfc3339()
            );
            match tab {
                Tab::Albums => {
                    for album in filter_albums(&snapshot.albums, search.as_deref(), sort) {
                        println!(
                            "{} - {} ({} tracks)",
                            album.artist_name, album.name, album.track_count
                        );
                    }
                }
                Tab::Playlists => {
                    for playlist in filter_playlists(&snapshot.playlists, search.as_deref(), sort) {
                        println!(
                            "{} by {} ({} tracks)",
                            playlist.name, playlist.owner_name, playlist.track_count
                        );
                    }
                }
            }
        }
        Commands::Status { user } => {
            let hub = open_hub(&config).await?;
            for status in hub.service_statuses(&user).await? {
                let synced = status
                    .last_synced_at
                    .map(|at| format!(", last synced {}", at.to_rfc3339()))
                    .unwrap_or_default();
                let configured = if status.configured { "" } else { " (not configured)" };
                println!(
                    "{}: {:?}{}{}",
                    status.provider.display_name(),
                    status.state,
                    synced,
                    configured
                );
            }
        }
        Commands::Disconnect { provider, user } => {
            let hub = open_hub(&config).await?;
            if hub.disconnect(&user, provider).await? {
                println!("Disconnected {}", provider.display_name());
            } else {
                println!("{} was not connected", provider.display_name());
            }
        }
        Commands::Config(config_commands) => match config_commands {
            ConfigCommands::CreateDefault => {
                let path = Config::create_default()?;
                tracing::info!("Default config written to {}", path.display());
            }
            ConfigCommands::Path => match Config::config_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("No default config path found"),
            },
        },
    }

    Ok(())
}
