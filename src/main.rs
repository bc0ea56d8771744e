use clap::{ArgAction, Parser, ValueEnum};
use ledgerflow::application::consumer::{CycleOutcome, LogConsumer};
use ledgerflow::application::engine::LedgerEngine;
use ledgerflow::application::publisher::OutcomePublisher;
use ledgerflow::application::service::MovementService;
use ledgerflow::config::{ConsumerConfig, MAX_ATTEMPTS};
use ledgerflow::domain::ports::{
    LedgerLogRepository, LedgerLogRepositoryBox, LedgerRepository, LedgerRepositoryBox,
    MessageQueueRef,
};
use ledgerflow::domain::queue::LOG_QUEUE;
use ledgerflow::error::LedgerError;
use ledgerflow::infrastructure::in_memory::InMemoryLedgerStore;
use ledgerflow::infrastructure::in_memory_queue::InMemoryQueue;
use ledgerflow::interfaces::csv::account_reader::AccountReader;
use ledgerflow::interfaces::csv::movement_reader::MovementReader;
use ledgerflow::interfaces::csv::writer::ReportWriter;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "amqp")]
use ledgerflow::infrastructure::amqp::{AmqpConfig, AmqpQueue};
#[cfg(feature = "storage-rocksdb")]
use ledgerflow::infrastructure::rocksdb::RocksDBStore;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Report {
    Accounts,
    Movements,
    Logs,
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input movements CSV file (account_id,type,amount,description)
    input: PathBuf,

    /// Accounts to seed before processing (id,name,balance,credit_limit)
    #[arg(long, env = "LEDGERFLOW_ACCOUNTS")]
    accounts: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "LEDGERFLOW_DB_PATH")]
    db_path: Option<PathBuf>,

    /// AMQP broker URL (optional). If provided, outcome events go through RabbitMQ.
    #[arg(long, env = "LEDGERFLOW_AMQP_URL")]
    amqp_url: Option<String>,

    /// Queue carrying outcome events
    #[arg(long, env = "LEDGERFLOW_QUEUE", default_value = LOG_QUEUE)]
    queue: String,

    /// Log consumer tick interval in milliseconds
    #[arg(long, env = "LEDGERFLOW_TICK_MS", default_value_t = 10_000)]
    tick_ms: u64,

    /// Persist attempts per outcome event before it is dropped
    #[arg(long, env = "LEDGERFLOW_MAX_ATTEMPTS", default_value_t = MAX_ATTEMPTS)]
    max_attempts: u32,

    /// Timeout for each queue operation in milliseconds
    #[arg(long, env = "LEDGERFLOW_OP_TIMEOUT_MS", default_value_t = 5_000)]
    op_timeout_ms: u64,

    /// Run consumer cycles until the log queue is empty before exiting
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    drain: bool,

    /// What to print on stdout once the batch is done
    #[arg(long, value_enum, default_value_t = Report::Accounts)]
    report: Report,
}

/// The ledger and audit sides of one store, handed out as separate boxes.
struct Stores {
    ledger: LedgerRepositoryBox,
    consumer_logs: LedgerLogRepositoryBox,
    report_logs: LedgerLogRepositoryBox,
}

impl Stores {
    fn from_store<S>(store: S) -> Self
    where
        S: LedgerRepository + LedgerLogRepository + Clone + 'static,
    {
        Self {
            ledger: Box::new(store.clone()),
            consumer_logs: Box::new(store.clone()),
            report_logs: Box::new(store),
        }
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<&Path>) -> Result<Stores> {
    match db_path {
        Some(path) => {
            let store = RocksDBStore::open(path).into_diagnostic()?;
            info!(path = %path.display(), "Using RocksDB storage");
            Ok(Stores::from_store(store))
        }
        None => Ok(Stores::from_store(InMemoryLedgerStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<&Path>) -> Result<Stores> {
    if db_path.is_some() {
        warn!(
            "Persistent storage requested via --db-path, \
             but 'storage-rocksdb' feature is not enabled. \
             Falling back to In-Memory storage."
        );
    }
    Ok(Stores::from_store(InMemoryLedgerStore::new()))
}

struct Queue {
    queue: MessageQueueRef,
    #[cfg(feature = "amqp")]
    amqp: Option<Arc<AmqpQueue>>,
}

impl Queue {
    fn in_memory() -> Self {
        Self {
            queue: Arc::new(InMemoryQueue::new()),
            #[cfg(feature = "amqp")]
            amqp: None,
        }
    }

    #[cfg(feature = "amqp")]
    async fn open(amqp_url: Option<&str>, op_timeout: Duration) -> Result<Self> {
        let Some(url) = amqp_url else {
            return Ok(Self::in_memory());
        };
        let config = AmqpConfig::new(url).with_op_timeout(op_timeout);
        let amqp = Arc::new(AmqpQueue::connect(config).await.into_diagnostic()?);
        Ok(Self {
            queue: amqp.clone(),
            amqp: Some(amqp),
        })
    }

    #[cfg(not(feature = "amqp"))]
    async fn open(amqp_url: Option<&str>, _op_timeout: Duration) -> Result<Self> {
        if amqp_url.is_some() {
            warn!(
                "Broker requested via --amqp-url, but 'amqp' feature is not enabled. \
                 Falling back to In-Memory queue."
            );
        }
        Ok(Self::in_memory())
    }

    async fn close(&self) {
        #[cfg(feature = "amqp")]
        if let Some(amqp) = &self.amqp {
            amqp.close().await;
        }
    }
}

async fn seed_accounts(repository: &dyn LedgerRepository, path: &Path) -> Result<()> {
    let file = File::open(path).into_diagnostic()?;
    for account in AccountReader::new(file).accounts() {
        match account {
            Ok(account) => {
                let id = account.id.clone();
                match repository.insert_account(account).await {
                    Ok(()) => info!(account_id = %id, "Account seeded"),
                    Err(LedgerError::Conflict(_)) => {
                        info!(account_id = %id, "Account already stored, keeping stored state")
                    }
                    Err(e) => return Err(e).into_diagnostic(),
                }
            }
            Err(e) => warn!(error = %e, "Skipping account row"),
        }
    }
    Ok(())
}

async fn write_report(
    report: Report,
    service: &MovementService,
    logs: &dyn LedgerLogRepository,
) -> Result<()> {
    let repository = service.engine().repository();
    let accounts = repository.all_accounts().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = ReportWriter::new(stdout.lock());

    if let Report::Accounts = report {
        return writer.write_accounts(&accounts).into_diagnostic();
    }

    let mut movements = Vec::new();
    for account in &accounts {
        let account_movements = repository
            .movements_for_account(&account.id)
            .await
            .into_diagnostic()?;
        movements.extend(account_movements);
    }
    movements.sort_by_key(|movement| movement.id);

    match report {
        Report::Movements => writer.write_movements(&movements).into_diagnostic(),
        _ => {
            let mut entries = Vec::new();
            for movement in &movements {
                if let Some(log) = logs.find_ledger_log(movement.id).await.into_diagnostic()? {
                    entries.push(log);
                }
            }
            writer.write_logs(&entries).into_diagnostic()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    let config = ConsumerConfig {
        queue: cli.queue.clone(),
        op_timeout: Duration::from_millis(cli.op_timeout_ms),
        ..ConsumerConfig::default()
    }
    .with_tick_interval(Duration::from_millis(cli.tick_ms.max(1)))
    .with_max_attempts(cli.max_attempts);

    let stores = open_stores(cli.db_path.as_deref())?;
    let queue = Queue::open(cli.amqp_url.as_deref(), config.op_timeout).await?;

    let publisher = OutcomePublisher::new(queue.queue.clone(), config.publisher());
    let service = MovementService::new(LedgerEngine::new(stores.ledger, publisher));

    if let Some(path) = &cli.accounts {
        seed_accounts(service.engine().repository(), path).await?;
    }

    let consumer = Arc::new(LogConsumer::new(
        queue.queue.clone(),
        stores.consumer_logs,
        config,
    ));
    let worker = consumer.clone().spawn();

    // Process movements
    let file = File::open(&cli.input).into_diagnostic()?;
    for request in MovementReader::new(file).movements() {
        match request {
            Ok(request) => {
                if let Err(e) = service.create_movement(request).await {
                    warn!(error = %e, "Movement not approved");
                }
            }
            Err(e) => warn!(error = %e, "Error reading movement"),
        }
    }

    worker.shutdown().await;
    if cli.drain {
        let outcomes = consumer.drain().await;
        let persisted = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, CycleOutcome::Persisted(_)))
            .count();
        info!(
            queue = %consumer.config().queue,
            cycles = outcomes.len(),
            persisted,
            "Log queue drained"
        );
    }

    write_report(cli.report, &service, stores.report_logs.as_ref()).await?;
    queue.close().await;

    Ok(())
}
