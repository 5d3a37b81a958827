//! Marketplace Trade Server
//! オファー交渉・取引ライフサイクル・台帳記録の API サーバー

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use marketplace_trade_server::{app, db, handlers, AppState};

/// オファー失効スイープの間隔（秒）
const EXPIRY_SWEEP_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ログ初期化
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let db_path = std::env::var("MARKETPLACE_DB").unwrap_or_else(|_| "/data/marketplace.db".to_string());
    let addr = std::env::var("MARKETPLACE_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    let pool = db::init_db(&db_path).await?;
    let state = Arc::new(AppState { db: pool });

    // 期限切れオファーの定期スイープ（読み取り時の lazy 失効と併用、どちらも冪等）
    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(EXPIRY_SWEEP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                if let Err(e) = handlers::offers::expire_offers(&state).await {
                    warn!("Offer expiry sweep failed: {}", e);
                }
            }
        });
    }

    let router = app(state);

    info!("🚀 Marketplace Trade Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
