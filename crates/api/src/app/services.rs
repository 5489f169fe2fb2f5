//! Service wiring: which ledger, gateway and stores back the HTTP surface.
//!
//! Everything is constructed here and passed down explicitly; nothing is global.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use retail_infra::config::AppConfig;
use retail_infra::gateway::{GatewayError, HttpLedgerGateway, LedgerGateway, LocalLedgerGateway};
use retail_infra::ledger::{InMemoryStockLedger, LedgerError, PostgresStockLedger, StockLedger};
use retail_infra::outbox::{
    CompensationOutbox, InMemoryCompensationOutbox, OutboxError, PostgresCompensationOutbox,
};
use retail_infra::projections::StockMirror;
use retail_infra::sale_records::{
    InMemorySaleRecordStore, PostgresSaleRecordStore, SaleRecordStore, SaleStoreError,
};
use retail_infra::saga::{AdjustmentFlow, CompensationRecovery, RecoveryHandle, SaleSaga};
use retail_infra::workers::{MirrorWorker, WorkerHandle};
use retail_observability::{AlarmSink, TracingAlarmSink};
use retail_products::InMemoryProductCatalog;

/// Staleness bound for mirrored quantities when no change feed is available.
const REMOTE_MIRROR_MAX_AGE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("ledger setup failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("sale store setup failed: {0}")]
    SaleStore(#[from] SaleStoreError),

    #[error("outbox setup failed: {0}")]
    Outbox(#[from] OutboxError),

    #[error("ledger gateway setup failed: {0}")]
    Gateway(#[from] GatewayError),
}

/// Collaborators the HTTP layer is built from.
pub struct ServiceParts {
    /// Ledger hosted by this process (serves `/ledger/...`); `None` when remote.
    pub ledger: Option<Arc<dyn StockLedger>>,
    pub gateway: Arc<dyn LedgerGateway>,
    pub catalog: Arc<InMemoryProductCatalog>,
    pub sales: Arc<dyn SaleRecordStore>,
    pub outbox: Arc<dyn CompensationOutbox>,
    pub alarms: Arc<dyn AlarmSink>,
    pub max_compensation_attempts: u32,
}

impl ServiceParts {
    /// Everything in memory, ledger hosted locally.
    pub fn in_memory(alarms: Arc<dyn AlarmSink>) -> Self {
        let ledger: Arc<dyn StockLedger> = InMemoryStockLedger::arc();
        let gateway = Arc::new(LocalLedgerGateway::new(ledger.clone(), Duration::from_secs(2)));
        Self {
            ledger: Some(ledger),
            gateway,
            catalog: Arc::new(InMemoryProductCatalog::new()),
            sales: Arc::new(InMemorySaleRecordStore::new()),
            outbox: InMemoryCompensationOutbox::arc(),
            alarms,
            max_compensation_attempts: retail_infra::saga::recovery::DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// In-memory sale storage in front of a ledger reached through `gateway`.
    pub fn with_remote_ledger(gateway: Arc<dyn LedgerGateway>, alarms: Arc<dyn AlarmSink>) -> Self {
        Self {
            ledger: None,
            gateway,
            ..Self::in_memory(alarms)
        }
    }
}

pub struct AppServices {
    pub ledger: Option<Arc<dyn StockLedger>>,
    pub catalog: Arc<InMemoryProductCatalog>,
    pub alarms: Arc<dyn AlarmSink>,
    pub saga: SaleSaga,
    pub adjustments: AdjustmentFlow,
    pub mirror: Arc<StockMirror>,
    pub recovery: Arc<CompensationRecovery>,
}

impl AppServices {
    pub fn new(parts: ServiceParts) -> Self {
        let ServiceParts {
            ledger,
            gateway,
            catalog,
            sales,
            outbox,
            alarms,
            max_compensation_attempts,
        } = parts;

        let saga = SaleSaga::new(
            catalog.clone(),
            gateway.clone(),
            sales,
            outbox.clone(),
            alarms.clone(),
        );
        let recovery = CompensationRecovery::new(saga.compensator().clone(), outbox, alarms.clone())
            .with_max_attempts(max_compensation_attempts);

        let mirror = StockMirror::new(gateway.clone());
        let mirror = if ledger.is_some() {
            mirror
        } else {
            mirror.with_max_age(REMOTE_MIRROR_MAX_AGE)
        };

        Self {
            ledger,
            catalog,
            alarms,
            saga,
            adjustments: AdjustmentFlow::new(gateway),
            mirror: Arc::new(mirror),
            recovery: Arc::new(recovery),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(ServiceParts::in_memory(Arc::new(TracingAlarmSink)))
    }

    /// Start the mirror feed (hosted ledger only) and the periodic compensation sweep.
    pub fn start_background(&self, sweep_interval: Duration) -> BackgroundTasks {
        let mirror_worker = self
            .ledger
            .as_ref()
            .map(|ledger| MirrorWorker::spawn(self.mirror.clone(), ledger.subscribe()));
        let sweep = self.recovery.clone().spawn_periodic(sweep_interval);
        BackgroundTasks {
            mirror_worker,
            sweep,
        }
    }
}

pub struct BackgroundTasks {
    mirror_worker: Option<WorkerHandle>,
    sweep: RecoveryHandle,
}

impl BackgroundTasks {
    pub async fn shutdown(self) {
        if let Some(worker) = self.mirror_worker {
            worker.shutdown().await;
        }
        self.sweep.shutdown().await;
    }
}

/// Build services from configuration.
///
/// - `DATABASE_URL` set: Postgres ledger (when hosted), sale store and outbox, migrated on start
/// - `LEDGER_URL` set: ledger reached over HTTP instead of hosted in-process
pub async fn build_services(config: &AppConfig) -> Result<AppServices, ServicesError> {
    let alarms: Arc<dyn AlarmSink> = Arc::new(TracingAlarmSink);

    let (hosted, sales, outbox): (
        Option<Arc<dyn StockLedger>>,
        Arc<dyn SaleRecordStore>,
        Arc<dyn CompensationOutbox>,
    ) = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(16).connect(url).await?;

            let sales = PostgresSaleRecordStore::new(pool.clone());
            sales.migrate().await?;
            let outbox = PostgresCompensationOutbox::new(pool.clone());
            outbox.migrate().await?;

            let ledger: Option<Arc<dyn StockLedger>> = if config.ledger_url.is_none() {
                let ledger = PostgresStockLedger::new(pool);
                ledger.migrate().await?;
                Some(Arc::new(ledger))
            } else {
                None
            };
            (ledger, Arc::new(sales), Arc::new(outbox))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory stores (state is lost on restart)");
            let ledger: Option<Arc<dyn StockLedger>> = if config.ledger_url.is_none() {
                Some(InMemoryStockLedger::arc())
            } else {
                None
            };
            (
                ledger,
                Arc::new(InMemorySaleRecordStore::new()),
                InMemoryCompensationOutbox::arc(),
            )
        }
    };

    let gateway: Arc<dyn LedgerGateway> = match (&config.ledger_url, &hosted) {
        (Some(url), _) => {
            tracing::info!(ledger_url = %url, "using remote ledger");
            Arc::new(HttpLedgerGateway::new(url.clone(), config.ledger_timeout)?)
        }
        (None, Some(ledger)) => Arc::new(LocalLedgerGateway::new(ledger.clone(), config.ledger_timeout)),
        (None, None) => {
            return Err(ServicesError::Gateway(GatewayError::Internal(
                "no ledger hosted and no LEDGER_URL configured".to_string(),
            )));
        }
    };

    Ok(AppServices::new(ServiceParts {
        ledger: hosted,
        gateway,
        catalog: Arc::new(InMemoryProductCatalog::new()),
        sales,
        outbox,
        alarms,
        max_compensation_attempts: config.max_compensation_attempts,
    }))
}
