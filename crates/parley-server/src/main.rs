//! parley-server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`) plus
//! `PARLEY_*` environment variables, opens the SQLite store, and serves the
//! JSON API over HTTP.
//!
//! # Password hash generation
//!
//! To generate the argon2 PHC string for an account's `password_hash`:
//!
//! ```
//! cargo run -p parley-server -- --hash-password
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::Context as _;
use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use clap::Parser;
use parley_engine::{ChannelNotifier, Deps, InMemoryPresence, Parley};
use parley_server::{AppState, ServerConfig, auth::AuthConfig};
use parley_store_sqlite::SqliteStore;
use rand_core::OsRng;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Parley session negotiation server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print the argon2 hash for a password entered on stdin and exit.
  #[arg(long)]
  hash_password: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  if cli.hash_password {
    let password = read_password()?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?
      .to_string();
    println!("{hash}");
    return Ok(());
  }

  let settings = config::Config::builder()
    .set_default("host", "127.0.0.1")?
    .set_default("port", 8080)?
    .set_default("store_path", "parley.db")?
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("PARLEY"))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  if server_cfg.accounts.is_empty() {
    tracing::warn!("no accounts configured; every request will be rejected");
  }

  let store = if server_cfg.store_path.as_path() == Path::new(":memory:") {
    SqliteStore::open_in_memory()
      .await
      .context("failed to open in-memory store")?
  } else {
    let store_path = expand_tilde(&server_cfg.store_path);
    SqliteStore::open(&store_path)
      .await
      .with_context(|| format!("failed to open store at {store_path:?}"))?
  };

  let presence = Arc::new(InMemoryPresence::new());
  let notifier = Arc::new(ChannelNotifier::new());
  let deps = Deps::new(Arc::new(store))
    .with_presence(presence.clone())
    .with_notifier(notifier.clone())
    .with_policy(server_cfg.policy())
    .with_eager_activation(server_cfg.eager_activation);
  let parley = Arc::new(Parley::new(deps));

  let sweep_every = Duration::from_secs(server_cfg.sweep_interval_secs.max(1));
  spawn_expiry_sweep(parley.clone(), sweep_every);

  let state = AppState {
    parley,
    presence,
    notifier,
    auth: Arc::new(AuthConfig::new(server_cfg.accounts.clone())),
  };

  let app = parley_server::router(state);
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Persist due expiries in the background so stored state catches up with
/// what readers already see.
fn spawn_expiry_sweep(parley: Arc<Parley<SqliteStore>>, every: Duration) {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(every);
    loop {
      ticker.tick().await;
      if let Err(err) = parley.negotiation.sweep_expired().await {
        tracing::warn!(error = %err, "expiry sweep failed");
      }
    }
  });
}

/// Prompt on stdout and read one line from stdin, without the line ending.
fn read_password() -> anyhow::Result<String> {
  use std::io::Write as _;
  print!("Password: ");
  std::io::stdout().flush().ok();
  let mut line = String::new();
  std::io::stdin()
    .read_line(&mut line)
    .context("failed to read password")?;
  Ok(line.trim_end_matches(['\r', '\n']).to_owned())
}

/// Resolve a leading `~/` against `$HOME`.
fn expand_tilde(path: &Path) -> PathBuf {
  match (path.strip_prefix("~"), std::env::var_os("HOME")) {
    (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
    _ => path.to_path_buf(),
  }
}
