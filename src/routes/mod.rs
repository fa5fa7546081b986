use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub mod contracts;
pub mod health;
pub mod payment_steps;
pub mod reports;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(contracts::router())
        .merge(payment_steps::router())
        .merge(reports::router())
}
