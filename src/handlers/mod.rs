//! API Handlers

use axum::response::Json;
use serde::Serialize;

pub mod ledger;
pub mod listings;
pub mod offers;
pub mod settings;
pub mod transactions;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// ヘルスチェック
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "marketplace-trade-server".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
