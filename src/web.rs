#![cfg(not(tarpaulin_include))]

use clap::Parser;
use sheet_browser::app;
use sheet_browser::config::{OAuthArgs, PORTAL_DEFAULTS, ServerArgs};

/// Sign in with Google, upload a spreadsheet and browse it page by page.
#[derive(Parser, Debug)]
#[command(name = "portal", version, about)]
struct Cli {
    #[command(flatten)]
    server: ServerArgs,

    #[command(flatten)]
    oauth: OAuthArgs,
}

/// Main entry point for the portal
///
/// Reads flags and environment, sets up logging and runs the server until it is
/// stopped. `RUST_LOG` overrides the default `info` level.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = cli.server.resolve(&PORTAL_DEFAULTS)?;
    let oauth = cli.oauth.resolve(&settings.public_url)?;

    app::run(settings, oauth).await
}
