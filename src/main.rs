use chrono_tz::Tz;
use clap::{ArgGroup, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tvfeed::TvError;
use tvfeed::config::fetch_config;
use tvfeed::credentials::{self, CredentialKey, populate_env_from_keychain};
use tvfeed::timezone::parse_tz;
use tvfeed::{OhlcvRequest, TradingView};

#[derive(Parser)]
#[command(name = "tvfeed")]
#[command(about = "TradingView quotes and OHLCV history")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print one quote snapshot per symbol as JSON.
    Quotes {
        #[arg(required = true)]
        symbols: Vec<String>,
    },
    /// Print bar history as CSV.
    Ohlcv {
        /// Resolution such as `1D`, `60` or `1W`.
        interval: String,
        candles: u32,
        #[arg(required = true)]
        symbols: Vec<String>,
        /// Built-in study to attach; repeat for more.
        #[arg(long)]
        study: Vec<String>,
        /// IANA zone for the Date column.
        #[arg(long, value_parser = parse_tz)]
        tz: Option<Tz>,
    },
    /// Print quote updates until interrupted.
    Stream {
        #[arg(required = true)]
        symbols: Vec<String>,
    },
    /// Store login details in the OS keychain.
    #[command(group(ArgGroup::new("secret").required(true).multiple(true).args(["username", "token"])))]
    Login {
        #[arg(long, requires = "password")]
        username: Option<String>,
        #[arg(long, requires = "username")]
        password: Option<String>,
        /// Pre-issued auth token.
        #[arg(long)]
        token: Option<String>,
    },
    /// Remove stored login details from the OS keychain.
    Logout,
}

fn main() -> Result<(), TvError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Commands::Login {
            username,
            password,
            token,
        } => {
            let entries = [
                (CredentialKey::Username, username),
                (CredentialKey::Password, password),
                (CredentialKey::AuthToken, token),
            ];
            for (key, value) in entries {
                if let Some(value) = value {
                    credentials::save(key, &value)?;
                    info!(key = key.env_var(), "Stored in keychain");
                }
            }
            Ok(())
        }
        Commands::Logout => {
            for key in CredentialKey::ALL {
                credentials::delete(key)?;
            }
            info!("Removed stored login details");
            Ok(())
        }
        command => {
            // Copy keychain entries into the environment before any threads start.
            populate_env_from_keychain();
            run(command)
        }
    }
}

fn ohlcv_request(
    interval: String,
    candles: u32,
    symbols: Vec<String>,
    studies: &[String],
    tz: Option<Tz>,
) -> Result<OhlcvRequest, TvError> {
    let studies: Vec<&str> = studies.iter().map(String::as_str).collect();
    let request = OhlcvRequest::new(symbols, interval, candles).with_builtin_studies(&studies)?;
    Ok(match tz {
        Some(tz) => request.with_timezone(tz),
        None => request,
    })
}

#[tokio::main]
async fn run(command: Commands) -> Result<(), TvError> {
    let app_config = fetch_config()?;
    let client = TradingView::from_config(&app_config.tradingview, None);

    let work = async {
        match command {
            Commands::Quotes { symbols } => {
                let quotes = client.quotes(&symbols, &[]).await?;
                println!("{}", serde_json::to_string_pretty(&quotes)?);
            }
            Commands::Ohlcv {
                interval,
                candles,
                symbols,
                study,
                tz,
            } => {
                let request = ohlcv_request(interval, candles, symbols, &study, tz)?;
                let table = client.ohlcv(&request).await?;
                print!("{table}");
            }
            Commands::Stream { symbols } => {
                let never = client
                    .stream_quotes(&symbols, &[], |update| {
                        let changed = serde_json::Value::Object(update.changed.clone());
                        println!("{} {changed}", update.symbol);
                    })
                    .await?;
                match never {}
            }
            Commands::Login { .. } | Commands::Logout => {}
        }
        Ok::<(), TvError>(())
    };

    tokio::select! {
        result = work => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, discarding partial results");
            Ok(())
        }
    }
}
