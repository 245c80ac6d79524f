#![cfg(not(tarpaulin_include))]

use clap::Parser;
use sheet_browser::api;
use sheet_browser::auth::{self, AuthGate, AuthState, GoogleProvider, OnUnauthenticated};
use sheet_browser::config::{API_DEFAULTS, OAuthArgs, ServerArgs};
use std::path::PathBuf;
use std::sync::Arc;

/// JSON backend for the spreadsheet viewer frontend.
#[derive(Parser, Debug)]
#[command(name = "api-server", version, about)]
struct Cli {
    #[command(flatten)]
    server: ServerArgs,

    #[command(flatten)]
    oauth: OAuthArgs,

    /// Built frontend served for every path the API does not handle
    #[arg(long, env = "STATIC_DIR", default_value = "frontend/build")]
    static_dir: PathBuf,

    /// Require a signed-in session for API calls
    #[arg(long, env = "REQUIRE_AUTH")]
    require_auth: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = cli.server.resolve(&API_DEFAULTS)?;

    let gate = if cli.require_auth {
        let oauth = cli.oauth.resolve(&settings.public_url)?;
        Some(AuthState {
            gate: Arc::new(AuthGate::new(Arc::new(GoogleProvider::new(oauth)))),
            key: auth::signing_key(settings.secret_key.as_deref()),
            on_unauthenticated: OnUnauthenticated::Reject,
        })
    } else {
        None
    };

    api::run(settings, cli.static_dir, gate).await
}
