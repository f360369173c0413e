use anyhow::Context;
use clap::{Parser, Subcommand};
use quorum_peer::commands;
use quorum_peer::config::{PeerConfig, CONF_PATH};
use quorum_peer::PeerContext;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "quorum_peer", version, about = "Threshold key session peer")]
struct Cli {
    /// Configuration file.
    #[arg(long, default_value = CONF_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the persisted state of an identity.
    Show { identity: String },
    /// Reset the persisted state of an identity.
    Clear { identity: String },
    /// Print how sessions ended.
    Journal {
        /// `group/session`
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        identity: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Validate a session entry point and print its canonical form.
    Route { path: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Command::Route { path } = &cli.command {
        print!("{}", commands::route(path)?);
        return Ok(());
    }

    let conf = PeerConfig::load(&cli.config).await?;
    init_tracer!(&conf.logging.Dir, "quorum_peer.log", &conf.logging.Level);
    info!(peer = %conf.peer.PeerId, command = ?cli.command, "quorum_peer starting");

    let ctx = PeerContext::open(conf)
        .await
        .context("Cannot open the peer database")?;
    let out = match &cli.command {
        Command::Show { identity } => commands::show(&ctx, identity).await?,
        Command::Clear { identity } => commands::clear(&ctx, identity).await?,
        Command::Journal {
            session,
            identity,
            limit,
        } => commands::journal(&ctx, session.as_deref(), identity.as_deref(), *limit).await?,
        Command::Route { path } => commands::route(path)?,
    };
    print!("{out}");
    Ok(())
}

#[macro_export]
macro_rules! init_tracer {
    ($log_dir:expr, $logfile_prefix:expr, $log_level:expr) => {
        let level = match ($log_level).to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "info" => tracing::Level::INFO,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        };
        let file_appender = tracing_appender::rolling::daily($log_dir, $logfile_prefix);
        let (nbl, _guard) = tracing_appender::non_blocking(file_appender);
        let subscriber = tracing_subscriber::fmt::Subscriber::builder()
            .with_writer(nbl)
            .with_max_level(level)
            .with_thread_ids(true)
            // plain text in the log file
            .with_ansi(false)
            .compact()
            .finish();
        if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("Cannot install the tracing subscriber -- {}", err);
        }
    };
}
