//! wgpool - WireGuard peer pool manager
//!
//! Keeps a WireGuard configuration document as the source of truth for an
//! overlay network and the live interface in sync with it.

mod output;

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use wgpool::{Error, IdentityOutcome, Manager, ReconcileStrategy, Settings};

#[derive(Parser)]
#[command(name = "wgpool", version, about = "WireGuard peer pool manager")]
struct Cli {
    /// Settings file (YAML).
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Interface name.
    #[arg(short = 'i', long, value_name = "NAME")]
    interface: Option<String>,

    /// Directory holding the document and key files.
    #[arg(long, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// How changes reach a running interface.
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Incremental,
    FullReload,
}

impl From<StrategyArg> for ReconcileStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Incremental => Self::Incremental,
            StrategyArg::FullReload => Self::FullReload,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Create the server identity if missing
    Init,

    /// Bring the interface up
    Up,

    /// Bring the interface down
    Down,

    /// Add a peer and print its client configuration
    Add {
        /// Peer name
        name: String,
    },

    /// Remove a peer
    #[command(visible_alias = "rm")]
    Remove {
        /// Peer name
        name: String,
    },

    /// List peers
    #[command(visible_alias = "ls")]
    List {
        /// Output JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show a peer and its client configuration
    Show {
        /// Peer name
        name: String,

        /// Output JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Apply the document to the running interface
    Sync,

    /// Clean up the document in place
    Normalize,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = match cli.config {
        Some(ref path) => Settings::from_yaml_file(path)?,
        None => Settings::new(),
    };
    if let Some(ref name) = cli.interface {
        settings = settings.interface(name.clone());
    }
    if let Some(ref dir) = cli.config_dir {
        settings = settings.config_dir(dir.clone());
    }
    if let Some(strategy) = cli.strategy {
        settings = settings.strategy(strategy.into());
    }
    Ok(settings)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = load_settings(&cli)?;
    let mut manager = Manager::system(settings)?;

    match cli.command {
        Command::Init => match manager.init().await? {
            IdentityOutcome::Created {
                public_key,
                reused_keys,
            } => {
                let source = if reused_keys { "existing" } else { "new" };
                println!("Server identity created from {} keys", source);
                println!("Public key: {}", public_key);
            }
            IdentityOutcome::AlreadyPresent => println!("Server identity already present"),
        },
        Command::Up => {
            manager.bring_up().await?;
            println!("{} is up", manager.settings().interface);
        }
        Command::Down => {
            manager.bring_down().await?;
            println!("{} is down", manager.settings().interface);
        }
        Command::Add { name } => {
            let added = manager.add_peer(&name).await?;
            output::print_added(&added);
        }
        Command::Remove { name } => {
            let removed = manager.remove_peer(&name).await?;
            println!("Removed {} ({})", removed.name, removed.reconcile);
        }
        Command::List { json } => {
            let peers = manager.list_peers()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&peers)?);
            } else {
                output::print_peers(&peers);
            }
        }
        Command::Show { name, json } => {
            let details = manager.show_peer(&name)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&details)?);
            } else {
                output::print_details(&details);
            }
        }
        Command::Sync => {
            let report = manager.resync().await?;
            println!("{}", report);
        }
        Command::Normalize => {
            let report = manager.normalize()?;
            println!("{}", report);
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        if let Some(err) = e.downcast_ref::<Error>() {
            if err.is_persisted() {
                eprintln!("The document was saved; run `wgpool sync` to apply it.");
            } else if err.is_busy() {
                eprintln!("Another wgpool process is working on this interface.");
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
