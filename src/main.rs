use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use serde_json::Value;

use dayglance_lib::digest::{DigestKind, DigestOutcome};
use dayglance_lib::settings::JsonFileStore;
use dayglance_lib::{categorize, AppContext, CommandRequest, CommandTable};

#[derive(Parser)]
#[command(name = "dayglance")]
#[command(about = "Categorized Google Calendar dashboard with a daily email digest")]
struct Cli {
    /// Settings file (defaults to ~/.dayglance/settings.json)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer JSON requests on stdin, one per line, and run the digest triggers
    Serve,
    /// Run a single command and print its response
    Call {
        action: String,

        /// Arguments as JSON (e.g. '{"view": "week"}')
        args: Option<String>,
    },
    /// List the available command actions
    Actions,
    /// Show the category an event title falls into
    Categorize {
        #[arg(required = true)]
        title: Vec<String>,
    },
    /// Send (or preview) a digest now
    Digest {
        kind: DigestArg,

        /// Print the email instead of sending it
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DigestArg {
    Morning,
    Evening,
}

impl From<DigestArg> for DigestKind {
    fn from(arg: DigestArg) -> Self {
        match arg {
            DigestArg::Morning => DigestKind::Morning,
            DigestArg::Evening => DigestKind::Evening,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Categorize { title } => {
            let category = categorize::categorize(&title.join(" "));
            println!("{} {}", category.emoji(), category.label());
            Ok(())
        }
        Commands::Actions => {
            for action in CommandTable::new().actions() {
                println!("{}", action);
            }
            Ok(())
        }
        Commands::Serve => {
            let ctx = Arc::new(open_context(cli.settings)?);
            dayglance_lib::serve(ctx).await?;
            Ok(())
        }
        Commands::Call { action, args } => {
            let ctx = open_context(cli.settings)?;
            let args: Value = match args {
                Some(raw) => serde_json::from_str(&raw).context("args must be valid JSON")?,
                None => Value::Null,
            };
            let response = CommandTable::new()
                .dispatch(
                    &ctx,
                    CommandRequest {
                        id: None,
                        action,
                        args,
                    },
                )
                .await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.is_ok() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Digest { kind, dry_run } => {
            let ctx = open_context(cli.settings)?;
            let kind = DigestKind::from(kind);
            if dry_run {
                match ctx.digest.compose(kind, &Local::now()).await? {
                    Some(digest) => {
                        println!("Subject: {}\n", digest.email.subject);
                        print!("{}", digest.email.text);
                    }
                    None => println!("No events for the {} digest.", kind.label()),
                }
                return Ok(());
            }

            match ctx.digest.run(kind, Local::now()).await {
                DigestOutcome::Sent { events } => {
                    println!("Sent {} digest ({} events).", kind.label(), events)
                }
                DigestOutcome::SendFailed => anyhow::bail!("{} digest was not sent", kind.label()),
                other => println!("Nothing sent: {:?}", other),
            }
            Ok(())
        }
    }
}

fn open_context(settings: Option<PathBuf>) -> Result<AppContext> {
    let path = settings.unwrap_or_else(JsonFileStore::default_path);
    let store = JsonFileStore::open(&path)
        .with_context(|| format!("Failed to open settings at {}", path.display()))?;
    log::debug!("Using settings at {}", path.display());
    Ok(AppContext::production(Arc::new(store))?)
}
