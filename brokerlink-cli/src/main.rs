//! Interactive smoke-test client for `brokerlink`.
//!
//! Logs in, prompts for the 2FA code on stdin, then drops into a small REPL
//! for poking at the adapter surface by hand. Not a production trading
//! client: no retry beyond what `brokerlink-core` already does, no
//! persistence beyond the on-disk device key.

use std::sync::Arc;
use std::time::Duration;

use brokerlink::{market_data, orders, portfolio};
use brokerlink_core::{AuthController, BrokerConfig, Credentials, KeyStore, WebSocketManager};
use clap::Parser;
use eyre::Context as _;
use secrecy::SecretString;
use tokio::io::{AsyncBufReadExt as _, BufReader};

/// Command-line / environment configuration for the CLI.
#[derive(Parser, Debug)]
#[command(name = "brokerlink-cli", about = "Interactive brokerlink smoke-test client")]
struct CliArgs {
    /// Base URL of the brokerage API.
    #[arg(long, env = "BROKERLINK_API_BASE", default_value = "https://api.example.com")]
    api_base: String,

    /// E.164 phone number used for login, e.g. `+491234567890`.
    #[arg(long, env = "BROKERLINK_PHONE")]
    phone: String,

    /// Account PIN.
    #[arg(long, env = "BROKERLINK_PIN")]
    pin: String,

    /// Directory the device key pair is persisted in. Defaults to the
    /// platform's per-user config directory.
    #[arg(long, env = "BROKERLINK_KEY_DIR")]
    key_dir: Option<std::path::PathBuf>,

    /// Per-request HTTP timeout.
    #[arg(long, env = "BROKERLINK_HTTP_TIMEOUT", default_value = "10s", value_parser = humantime::parse_duration)]
    http_timeout: Duration,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("brokerlink_cli=info,brokerlink=info,brokerlink_core=info,warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = CliArgs::parse();
    tracing::info!(api_base = %args.api_base, "starting brokerlink-cli");

    let key_dir = match args.key_dir {
        Some(dir) => dir,
        None => KeyStore::resolve_default_dir().context("resolving default key directory")?,
    };
    let key_store = Arc::new(KeyStore::new(key_dir).context("opening key store")?);
    let ws = Arc::new(WebSocketManager::new(
        Duration::from_secs(20),
        Duration::from_secs(40),
    ));
    let config = BrokerConfig {
        api_base: args.api_base,
        http_timeout: args.http_timeout,
        ..BrokerConfig::default()
    };
    let credentials = Credentials {
        phone_number: args.phone,
        pin: SecretString::from(args.pin),
    };
    let auth = AuthController::new(config, credentials, key_store, ws)
        .context("building auth controller")?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    tracing::info!("logging in...");
    auth.login().await.context("login")?;
    tracing::info!("login accepted, a 2FA code has been requested");

    println!("Enter the 2FA code sent to your device:");
    let code = stdin
        .next_line()
        .await?
        .ok_or_else(|| eyre::eyre!("stdin closed before a 2FA code was entered"))?;
    auth.verify_two_factor(code.trim())
        .await
        .context("verifying 2FA code")?;
    tracing::info!("authenticated, websocket connected");

    println!("Connected. Commands: ticker <isin> | search <query> | portfolio | cash | orders | quit");
    loop {
        let Some(line) = stdin.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Err(err) = dispatch(&auth, line).await {
            println!("error: {err}");
        }
        if line == "quit" || line == "exit" {
            break;
        }
    }

    auth.disconnect().await;
    Ok(())
}

async fn dispatch(auth: &AuthController, line: &str) -> eyre::Result<()> {
    let mut parts = line.splitn(2, ' ');
    let command = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default().trim();

    match command {
        "quit" | "exit" => {}
        "ticker" => {
            let snapshot = market_data::ticker(auth, rest).await?;
            println!("{snapshot:#?}");
        }
        "search" => {
            let hits = market_data::search(auth, rest).await?;
            println!("{hits:#?}");
        }
        "portfolio" => {
            let snapshot = portfolio::compact_portfolio(auth).await?;
            println!("{snapshot:#?}");
        }
        "cash" => {
            let balance = portfolio::cash(auth).await?;
            println!("{balance:#?}");
        }
        "orders" => {
            let open = orders::orders(auth).await?;
            println!("{open:#?}");
        }
        other => {
            println!("unknown command: {other}");
        }
    }
    Ok(())
}
