use std::env;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use ledger_core::config::LedgerConfig;
use ledger_core::csv::{read_commands, read_plans, write_accounts};
use ledger_core::outbox::{Dispatcher, LogEvidenceStore, LogMailer, Outbox};
use ledger_core::scheduler::SettlementScheduler;
use ledger_core::{Engine, PlanCatalog, Store};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let Some(path) = env::args().nth(1) else {
        error!("usage: ledger-core <commands.csv>");
        return ExitCode::FAILURE;
    };
    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let config = match LedgerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let store = match &config.journal {
        Some(journal) => match Store::open(journal) {
            Ok(store) => store,
            Err(e) => {
                error!(journal = %journal.display(), "failed to open journal: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => Store::in_memory(),
    };
    let catalog = match &config.plans {
        Some(plans) => match read_plans(plans) {
            Ok(catalog) => catalog,
            Err(e) => {
                error!("{e}");
                return ExitCode::FAILURE;
            }
        },
        None => PlanCatalog::default(),
    };
    let commands = match read_commands(Path::new(&path)) {
        Ok(commands) => commands,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let (outbox, effects) = Outbox::channel();
    let dispatcher = tokio::spawn(async move {
        Dispatcher::new(LogMailer, LogEvidenceStore)
            .run(effects)
            .await
    });

    let engine = Engine::new(store, catalog, outbox);
    let (cmd_sender, cmd_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in commands {
            match result {
                Ok(command) => {
                    if cmd_sender.send(command).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    engine.run(ReceiverStream::new(cmd_receiver)).await;

    if let Err(e) = write_accounts(engine.summaries().await, std::io::stdout().lock()) {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    if config.serve {
        let scheduler = Arc::new(SettlementScheduler::new(
            engine.clone(),
            config.settlement_interval,
        ));
        let ticking = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for shutdown: {e}");
        }
        info!("shutting down");
        ticking.abort();
        let _ = ticking.await;
    }

    // closing the outbox lets the dispatcher drain what is left
    drop(engine);
    if let Err(e) = dispatcher.await {
        warn!("side-effect dispatcher stopped: {e}");
    }
    ExitCode::SUCCESS
}
