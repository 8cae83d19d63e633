// Pigeon Linux: pairing prompt, inbox polling and HTTP transport daemon.

mod config;
mod prompt;
mod store;
mod transport;
mod wallets;

use std::time::Duration;

use anyhow::Context;
use pigeon_core::worker::{self, WorkQueue};
use pigeon_core::{ExchangeConfig, Host, MessageExchange, PairingSession, WorkItem};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::prompt::Command;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("pigeon-linux {}", VERSION);
            return Ok(());
        }
    }

    let cfg = config::load()?;
    init_logging(&cfg.log_level);
    info!(version = VERSION, api = %cfg.api_url, "starting");

    // Built outside the runtime: the blocking HTTP client must not be created or dropped
    // on a tokio thread.
    let exchange = build_exchange(&cfg)?;
    let worker = worker::spawn(exchange).context("starting worker")?;
    let poll_every = Duration::from_secs(cfg.poll_interval_secs.max(1));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        tokio::spawn(poll_inbox(worker.queue(), poll_every));
        tokio::select! {
            r = read_commands(worker.queue()) => r,
            r = shutdown_signal() => r,
        }
    })?;
    // Stdin reads block a runtime thread; don't wait for them.
    rt.shutdown_timeout(Duration::from_secs(1));

    worker.shutdown();
    info!("stopped");
    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_exchange(cfg: &config::Config) -> anyhow::Result<MessageExchange> {
    let host = Host {
        transport: Box::new(transport::HttpTransport::new(
            &cfg.api_url,
            cfg.api_token.clone(),
        )?),
        store: Box::new(
            store::FileStore::open(&cfg.state_file)
                .with_context(|| format!("opening {}", cfg.state_file.display()))?,
        ),
        keys: Box::new(store::FileKeyStore::new(&cfg.auth_key_file)),
        prompt: Box::new(prompt::TerminalPrompt),
        wallets: Box::new(wallets::ConfiguredWallets::new(cfg.wallets.clone())),
    };
    let config = ExchangeConfig {
        device_id: cfg.device_id.clone(),
        wallet_id: cfg.wallet_id.clone(),
    };
    Ok(MessageExchange::new(config, host))
}

/// Queue an inbox poll every `every`, starting now.
async fn poll_inbox(queue: WorkQueue, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if queue.enqueue(WorkItem::RetrieveMessages).is_err() {
            return;
        }
    }
}

/// Read commands until `quit`. Without a terminal (stdin at EOF) this never returns and the
/// daemon runs until signalled.
async fn read_commands(queue: WorkQueue) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let item = match Command::parse(&line) {
            Ok(Command::Quit) => return Ok(()),
            Ok(Command::Pair(link)) => match PairingSession::from_link(&link) {
                Ok(session) => WorkItem::RequestToPair(session),
                Err(e) => {
                    warn!(error = %e, "bad pairing link");
                    continue;
                }
            },
            Ok(Command::Approve) => WorkItem::PairingDecided { approved: true },
            Ok(Command::Deny) => WorkItem::PairingDecided { approved: false },
            Ok(Command::Poll) => WorkItem::RetrieveMessages,
            Err(msg) => {
                eprintln!("{msg}");
                continue;
            }
        };
        queue.enqueue(item).context("worker stopped")?;
    }
    debug!("stdin closed");
    std::future::pending::<()>().await;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    info!("shutdown requested");
    Ok(())
}
