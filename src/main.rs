mod config;
mod logging;
mod mail;
mod query;
mod reporter;
mod server;
mod store;
mod timecard;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;

use crate::config::Config;
use crate::timecard::auth::{password_digest, timecode};

#[derive(Parser, Debug)]
#[command(name = "timecard")]
#[command(about = "Clock in/out service backed by a hosted JSON bucket")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./timecard.yaml, then $XDG_CONFIG_HOME/timecard/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run the HTTP server (default)
  Serve,
  /// Mail this week's hours, archive the snapshot and clear hours
  Report,
  /// Print the stored digest for a password
  Hash { password: String },
  /// Print the current hour's time-code
  Code {
    /// Print the full clock page URL under this base instead of the bare code
    #[arg(long)]
    base_url: Option<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  match args.command.unwrap_or(Command::Serve) {
    Command::Serve => {
      let config = Config::load(args.config.as_deref())?;
      let _guard = logging::init(&config.logging)?;
      server::serve(&config).await
    }
    Command::Report => {
      let config = Config::load(args.config.as_deref())?;
      let _guard = logging::init(&config.logging)?;
      run_report(&config).await
    }
    Command::Hash { password } => {
      println!("{}", password_digest(&password));
      Ok(())
    }
    Command::Code { base_url } => {
      let code = timecode(&Config::get_secret()?, chrono::Utc::now().timestamp());
      match base_url {
        Some(base) => println!("{}", clock_page_url(&base, &code)?),
        None => println!("{}", code),
      }
      Ok(())
    }
  }
}

async fn run_report(config: &Config) -> Result<()> {
  let store = store::StoreClient::new(config.store.settings())
    .map_err(|e| eyre!("Failed to create store client: {}", e))?;
  let mailer = server::mail_transport(config);
  let settings = reporter::ReportSettings::new(config.mail.from.clone(), config.mail.to.clone());

  let summary = reporter::run_weekly_report(&store, &mailer, &settings).await?;
  println!("{}", serde_json::to_string_pretty(&summary)?);
  Ok(())
}

fn clock_page_url(base: &str, code: &str) -> Result<url::Url> {
  let mut url = url::Url::parse(base)
    .and_then(|b| b.join("h"))
    .map_err(|e| eyre!("Invalid base URL {:?}: {}", base, e))?;
  url.query_pairs_mut().append_pair("code", code);
  Ok(url)
}
