use anyhow::Result;
use clap::{Parser, Subcommand};
use ragnar::commands;
use ragnar::config::{ConfigArgs, Settings};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "ragnar")]
#[command(
  about = "Ragnar - Retrieval-Augmented Answers\nGrounded answers from a small embedded corpus"
)]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), ", courtesy of Kernelle Software"))]
struct Cli {
  /// Increase log output (-v info, -vv debug, -vvv trace)
  #[arg(short, long, action = clap::ArgAction::Count, global = true)]
  verbose: u8,

  #[command(flatten)]
  config: ConfigArgs,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Answer a question using the closest corpus records as context
  Ask {
    /// Print the ranked context before the answer
    #[arg(short, long)]
    show_context: bool,
    /// Question text (defaults to the curling example)
    query: Vec<String>,
  },
  /// Rank the corpus against a question without generating an answer
  Search {
    /// Emit results as JSON
    #[arg(long)]
    json: bool,
    /// Question text (defaults to the curling example)
    query: Vec<String>,
  },
  /// Decode the corpus and report record and dimension counts
  Inspect,
}

async fn handle(command: Command, settings: &Settings, cancel: &CancellationToken) -> Result<()> {
  match command {
    Command::Ask { show_context, query } => {
      commands::ask(settings, &commands::query_text(&query), show_context, cancel).await
    }
    Command::Search { json, query } => {
      commands::search(settings, &commands::query_text(&query), json, cancel).await
    }
    Command::Inspect => commands::inspect(settings),
  }
}

fn cancel_on_interrupt() -> CancellationToken {
  let cancel = CancellationToken::new();
  let watcher = cancel.clone();

  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      tracing::warn!("Interrupted, cancelling the current query");
      watcher.cancel();
    }
  });

  cancel
}

async fn run(cli: Cli) -> Result<()> {
  let settings = Settings::resolve(&cli.config)?;
  let cancel = cancel_on_interrupt();
  handle(cli.command, &settings, &cancel).await
}

#[tokio::main]
async fn main() {
  dotenv::dotenv().ok();

  let cli = Cli::parse();
  bentley::init(cli.verbose);

  if let Err(e) = run(cli).await {
    tracing::error!("{e:#}");
    std::process::exit(1);
  }
}
