use anyhow::Result;
use arc_swap::ArcSwap;
use clap::{Parser, Subcommand};
use relay_auth::TokenResolver;
use relay_catalog::{CatalogService, ModelCatalog, RefreshOptions};
use relay_config::AppConfig;
use relay_proxy::AppState;
use relay_store::ProfileStore;
use relay_types::{RefreshSource, redact};
use relay_upstream::CopilotClient;
use std::{path::PathBuf, sync::Arc, time::Duration};

#[derive(Parser, Debug)]
#[command(
    name = "copilot-relay",
    about = "copilot-relay — expose GitHub Copilot as OpenAI, Anthropic, and Ollama APIs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Common server arguments.
#[derive(clap::Args, Debug)]
struct ServerArgs {
    /// Override the listening port (default: 3000).
    #[arg(short, long)]
    port: Option<u16>,
    /// Override the listening address (default: localhost).
    #[arg(long)]
    host: Option<String>,
    /// Copilot token to serve with, instead of stored credentials.
    #[arg(long, value_name = "TOKEN")]
    token: Option<String>,
    /// Config/state directory (default: ~/.config/copilot-relay).
    #[arg(long, value_name = "DIR")]
    state_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the proxy server (foreground).
    Serve {
        #[command(flatten)]
        server: ServerArgs,
    },
    /// Authenticate with GitHub Copilot via the device flow.
    Login {
        /// Config/state directory (default: ~/.config/copilot-relay).
        #[arg(long, value_name = "DIR")]
        state_dir: Option<PathBuf>,
    },
    /// Remove a stored profile (the active one when unspecified).
    Logout {
        /// Profile id (e.g. `github-octocat`).
        profile: Option<String>,
        #[arg(long, value_name = "DIR")]
        state_dir: Option<PathBuf>,
    },
    /// Show stored profiles and the active marker.
    Status {
        #[arg(long, value_name = "DIR")]
        state_dir: Option<PathBuf>,
    },
    /// Print the active profile's model catalog.
    Models {
        /// Force a verified refresh before printing.
        #[arg(long)]
        refresh: bool,
        #[arg(long, value_name = "DIR")]
        state_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { server } => cmd_serve(server).await,
        Commands::Login { state_dir } => cmd_login(state_dir).await,
        Commands::Logout { profile, state_dir } => cmd_logout(profile, state_dir),
        Commands::Status { state_dir } => cmd_status(state_dir),
        Commands::Models { refresh, state_dir } => cmd_models(refresh, state_dir).await,
    }
}

fn open_store(state_dir: Option<PathBuf>) -> Arc<ProfileStore> {
    Arc::new(match state_dir {
        Some(dir) => ProfileStore::new(dir),
        None => ProfileStore::open_default(),
    })
}

// ── Serve ────────────────────────────────────────────────────────────────────

async fn cmd_serve(args: ServerArgs) -> Result<()> {
    let store = open_store(args.state_dir);
    let config = AppConfig::load(store.root()).map_err(|e| anyhow::anyhow!("config error: {e}"))?;

    // _log_guard must be held until the server exits to flush buffered writes.
    let _log_guard = init_tracing(&config);

    let addr = format!(
        "{}:{}",
        args.host.as_deref().unwrap_or(&config.host),
        args.port.unwrap_or(config.port),
    );

    let http = rquest::Client::new();
    let resolver = Arc::new(TokenResolver::new(
        Arc::clone(&store),
        http.clone(),
        args.token,
    ));
    let client = Arc::new(CopilotClient::new(http));
    let catalog = Arc::new(ModelCatalog::new(
        store.root().to_path_buf(),
        Arc::clone(&client),
        config.catalog.ttl_minutes * 60_000,
    ));

    let refresh_interval = Duration::from_secs(config.model.refresh_interval_minutes * 60);
    let service = CatalogService::start(
        Arc::clone(&catalog),
        Arc::clone(&resolver),
        Arc::clone(&store),
        refresh_interval,
    );

    let config = Arc::new(ArcSwap::from_pointee(config));
    let state = AppState::new(config, store, resolver, catalog, client);
    let app = relay_proxy::make_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "copilot-relay listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    service.stop().await;
    Ok(())
}

fn init_tracing(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let level = match config.log.verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if let Some(ref log_path) = config.log.file {
        let path = std::path::Path::new(log_path);
        let dir = path.parent().unwrap_or(std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or(std::ffi::OsStr::new("copilot-relay.log"));
        let file_appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(non_blocking)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
        None
    }
}

// ── Auth commands ────────────────────────────────────────────────────────────

async fn cmd_login(state_dir: Option<PathBuf>) -> Result<()> {
    let store = open_store(state_dir);
    let http = rquest::Client::new();
    let profile = relay_auth::flow::login(&store, &http)
        .await
        .map_err(|e| anyhow::anyhow!("login failed: {e}"))?;
    println!(
        "profile {} saved (token {})",
        profile.id,
        redact(&profile.token)
    );
    Ok(())
}

fn cmd_logout(profile: Option<String>, state_dir: Option<PathBuf>) -> Result<()> {
    let store = open_store(state_dir);
    let id = match profile {
        Some(id) => id,
        None => store
            .get_active()
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .ok_or_else(|| anyhow::anyhow!("no active profile to log out"))?,
    };
    store
        .delete_profile(&id)
        .map_err(|e| anyhow::anyhow!("logout failed: {e}"))?;
    println!("{id} logged out");
    Ok(())
}

fn cmd_status(state_dir: Option<PathBuf>) -> Result<()> {
    let store = open_store(state_dir);
    let profiles = store.load_profiles().map_err(|e| anyhow::anyhow!("{e}"))?;
    if profiles.is_empty() {
        println!("no profiles; run `copilot-relay login`");
        return Ok(());
    }
    let active = store.get_active().unwrap_or_default();
    for (id, profile) in &profiles {
        let marker = if active.as_deref() == Some(id.as_str()) {
            " (active)"
        } else {
            ""
        };
        println!(
            "{id}{marker}  user={}  token={}",
            profile.user.login,
            redact(&profile.token)
        );
    }
    Ok(())
}

// ── Catalog command ──────────────────────────────────────────────────────────

async fn cmd_models(refresh: bool, state_dir: Option<PathBuf>) -> Result<()> {
    let store = open_store(state_dir);
    let config = AppConfig::load(store.root()).map_err(|e| anyhow::anyhow!("{e}"))?;

    let profile_id = store
        .get_active()
        .map_err(|e| anyhow::anyhow!("{e}"))?
        .ok_or_else(|| anyhow::anyhow!("no active profile; run `copilot-relay login`"))?;

    let http = rquest::Client::new();
    let resolver = TokenResolver::new(Arc::clone(&store), http.clone(), None);
    let token = resolver
        .resolve(None, true)
        .await
        .ok_or_else(|| anyhow::anyhow!("no usable token; run `copilot-relay login`"))?;

    let client = Arc::new(CopilotClient::new(http));
    let catalog = ModelCatalog::new(
        store.root().to_path_buf(),
        client,
        config.catalog.ttl_minutes * 60_000,
    );

    let view = if refresh {
        catalog
            .refresh(RefreshOptions {
                verify: true,
                source: RefreshSource::Manual,
                ..RefreshOptions::unverified(&profile_id, &token)
            })
            .await
    } else {
        match catalog.get_entry(&profile_id) {
            Some(view) => view,
            None => {
                catalog
                    .refresh(RefreshOptions::unverified(&profile_id, &token))
                    .await
            }
        }
    };

    if let Some(err) = &view.entry.error {
        anyhow::bail!("catalog refresh failed: {err}");
    }
    println!(
        "{} models for {profile_id} (status {:?}, age {}s):",
        view.entry.models.len(),
        view.status,
        view.age_ms / 1000,
    );
    for model in &view.entry.models {
        if model.eq_ignore_ascii_case(&config.model.default) {
            println!("  * {model} (default)");
        } else {
            println!("    {model}");
        }
    }
    Ok(())
}
