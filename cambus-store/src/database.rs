use crate::app_config::{BusinessRules, DatabaseConfig};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Overlay rows of the `business_rules` table on top of the file configuration.
    /// Rows hold `{"value": <number>}`; unknown keys and malformed values are skipped.
    pub async fn fetch_business_rules(&self, defaults: BusinessRules) -> Result<BusinessRules, sqlx::Error> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT rule_key, rule_value::text FROM business_rules")
                .fetch_all(&self.pool)
                .await?;

        let mut rules = defaults;
        for (key, raw) in rows {
            match serde_json::from_str::<Value>(&raw) {
                Ok(value) => apply_rule(&mut rules, &key, &value),
                Err(e) => warn!("Ignoring business rule {}: {}", key, e),
            }
        }

        Ok(rules)
    }
}

fn apply_rule(rules: &mut BusinessRules, key: &str, value: &Value) {
    let Some(v) = value.get("value").and_then(Value::as_u64) else {
        return;
    };

    match key {
        "seat_hold_seconds" => rules.seat_hold_seconds = v,
        "sweep_interval_seconds" => rules.sweep_interval_seconds = v,
        "sweep_batch_size" => rules.sweep_batch_size = v as usize,
        _ => {}
    }
}
