//! Marketplace Trade Server
//! オファー交渉 → 取引ライフサイクル → 台帳記録のエンジン
//!
//! 直列化保証はすべて SQLite のトランザクションとステータス条件付き
//! UPDATE に依存する。プロセス内に永続的な並行プリミティブは持たない。

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use rand::Rng;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub mod db;
pub mod error;
pub mod fees;
pub mod handlers;
pub mod models;
pub mod notify;

use db::DbPool;

/// アプリケーション共有状態
pub struct AppState {
    pub db: DbPool,
}

/// ルーター構築（tests からも呼べるよう公開）
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health_check))
        // Listings
        .route("/api/listings", post(handlers::listings::create_listing))
        .route("/api/listings", get(handlers::listings::list_listings))
        .route("/api/listings/:listing_id", get(handlers::listings::get_listing))
        .route("/api/listings/:listing_id", delete(handlers::listings::remove_listing))
        .route("/api/listings/:listing_id/activate", post(handlers::listings::activate_listing))
        .route("/api/listings/:listing_id/offers", get(handlers::offers::list_listing_offers))
        // Offers
        .route("/api/offers", post(handlers::offers::create_offer))
        .route("/api/offers/:offer_id", get(handlers::offers::get_offer))
        .route("/api/offers/:offer_id/accept", post(handlers::offers::accept_offer))
        .route("/api/offers/:offer_id/reject", post(handlers::offers::reject_offer))
        .route("/api/offers/:offer_id/counter", post(handlers::offers::counter_offer))
        // Transactions
        .route("/api/transactions", get(handlers::transactions::list_transactions))
        .route("/api/transactions/:transaction_id", get(handlers::transactions::get_transaction))
        .route(
            "/api/transactions/:transaction_id/verify-payment",
            post(handlers::transactions::verify_payment),
        )
        .route("/api/transactions/:transaction_id/ship", post(handlers::transactions::ship))
        .route(
            "/api/transactions/:transaction_id/delivered",
            post(handlers::transactions::record_delivery),
        )
        .route(
            "/api/transactions/:transaction_id/confirm-delivery",
            post(handlers::transactions::confirm_delivery),
        )
        .route("/api/transactions/:transaction_id/dispute", post(handlers::transactions::file_dispute))
        .route("/api/transactions/:transaction_id/cancel", post(handlers::transactions::cancel))
        // Ledger
        .route("/api/ledger", get(handlers::ledger::list_ledger))
        // Platform settings
        .route("/api/settings", get(handlers::settings::get_settings))
        .route("/api/settings", put(handlers::settings::update_settings))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ========================================
// Helper Functions
// ========================================

/// ドメインID生成: プレフィックス + Crockford base32 の8文字
pub fn generate_id(prefix: &str) -> String {
    let random_bytes: [u8; 5] = rand::thread_rng().gen();
    let encoded = base32::encode(base32::Alphabet::Crockford, &random_bytes);
    format!("{}_{}", prefix, &encoded[..8])
}

/// `X-User-Id` ヘッダーから操作主体を取り出す（認証自体は外部）
pub fn actor_id(headers: &axum::http::HeaderMap) -> Result<String, error::ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| error::ApiError::Forbidden("X-User-Id header required".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    #[test]
    fn generated_ids_carry_prefix() {
        let id = generate_id("OFF");
        assert!(id.starts_with("OFF_"));
        assert_eq!(id.len(), 4 + 8);
    }

    #[test]
    fn actor_id_requires_header() {
        let headers = HeaderMap::new();
        assert!(actor_id(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", "user_a".parse().unwrap());
        assert_eq!(actor_id(&headers).unwrap(), "user_a");
    }
}
