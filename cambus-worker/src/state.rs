use anyhow::Context;
use cambus_catalog::InMemoryScheduleStore;
use cambus_core::{Clock, ReservationStore, ScheduleStore, SystemClock};
use cambus_order::{
    BookingContext, ExpirySweeper, MockPaymentGateway, PaymentOrchestrator, PaymentSettlement, ReservationManager,
};
use cambus_store::app_config::{BusinessRules, Config};
use cambus_store::{DbClient, InMemoryReservationStore, PgReservationStore, PgScheduleStore};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Effective rules after database overrides.
    pub business_rules: BusinessRules,
    pub context: BookingContext,
    pub manager: Arc<ReservationManager>,
    pub settlement: Arc<PaymentSettlement>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub sweeper: Arc<ExpirySweeper>,
    pub db: Option<Arc<DbClient>>,
    /// Set only when running without a database.
    pub catalog: Option<Arc<InMemoryScheduleStore>>,
}

impl AppState {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let (schedules, reservations, business_rules, db, catalog) = match &config.database {
            Some(database) => {
                let db = DbClient::new(database)
                    .await
                    .context("Failed to connect to PostgreSQL")?;
                db.migrate().await.context("Failed to run migrations")?;
                let rules = db
                    .fetch_business_rules(config.business_rules.clone())
                    .await
                    .context("Failed to load business rules")?;
                info!("Using PostgreSQL stores");

                let schedules: Arc<dyn ScheduleStore> = Arc::new(PgScheduleStore::new(db.pool.clone()));
                let reservations: Arc<dyn ReservationStore> = Arc::new(PgReservationStore::new(db.pool.clone()));
                (schedules, reservations, rules, Some(Arc::new(db)), None)
            }
            None => {
                warn!("No database configured, reservations are kept in memory");
                let catalog = Arc::new(InMemoryScheduleStore::new());
                let schedules: Arc<dyn ScheduleStore> = catalog.clone();
                let reservations: Arc<dyn ReservationStore> = Arc::new(InMemoryReservationStore::new());
                (schedules, reservations, config.business_rules.clone(), None, Some(catalog))
            }
        };

        let payment = &config.payment;
        let gateway = Arc::new(MockPaymentGateway::new(payment.success_rate, payment.latency()));
        let orchestrator = Arc::new(
            PaymentOrchestrator::new(gateway, clock.clone())
                .with_timeout(payment.timeout())
                .with_breaker(payment.breaker_threshold, payment.breaker_reset()),
        );

        let context = BookingContext::new(schedules, reservations, clock);
        let manager = Arc::new(
            ReservationManager::new(context.clone()).with_hold_duration(business_rules.hold_duration()),
        );
        let settlement = Arc::new(PaymentSettlement::new(manager.clone(), orchestrator.clone()));
        let sweeper = Arc::new(ExpirySweeper::new(manager.clone()).with_batch_size(business_rules.sweep_batch_size));

        info!(
            "Seat holds last {}s, sweeping every {}s",
            business_rules.seat_hold_seconds, business_rules.sweep_interval_seconds
        );

        Ok(Self {
            config,
            business_rules,
            context,
            manager,
            settlement,
            orchestrator,
            sweeper,
            db,
            catalog,
        })
    }
}
