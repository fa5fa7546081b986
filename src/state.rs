use sqlx::PgPool;

use crate::config::AppConfig;
use crate::db;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db_pool: Option<PgPool>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = match &config.database_url {
            Some(url) => Some(db::build_pool(url, &config)?),
            None => {
                tracing::warn!("DATABASE_URL is not set — starting without a database pool");
                None
            }
        };
        Ok(Self { config, db_pool })
    }
}
