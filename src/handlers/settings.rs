//! Platform Settings Handlers
//! /api/settings エンドポイント - シングルトン設定
//!
//! Fee Policy は必ず「取引作成時点のスナップショット」を受け取る。
//! ここを後から変更しても過去の取引の金額は変わらない。

use axum::{extract::State, response::Json};
use std::sync::Arc;
use tracing::info;

use crate::db::DbPool;
use crate::error::ApiError;
use crate::models::{Data, PlatformSettings, UpdateSettingsRequest};
use crate::AppState;

/// 設定を読み込む。存在しなければデフォルトで lazily 作成する。
pub async fn load_settings(pool: &DbPool) -> Result<PlatformSettings, ApiError> {
    let now = chrono::Utc::now().timestamp();
    let defaults = PlatformSettings::defaults(now);

    sqlx::query(r#"
        INSERT OR IGNORE INTO platform_settings (
            id, marketplace_fee_bps, free_threshold, instant_fee_bps,
            escrow_release_days, updated_at
        ) VALUES (1, ?, ?, ?, ?, ?)
    "#)
    .bind(defaults.marketplace_fee_bps)
    .bind(defaults.free_threshold)
    .bind(defaults.instant_fee_bps)
    .bind(defaults.escrow_release_days)
    .bind(defaults.updated_at)
    .execute(pool)
    .await?;

    let settings: PlatformSettings =
        sqlx::query_as("SELECT * FROM platform_settings WHERE id = 1")
            .fetch_one(pool)
            .await?;

    Ok(settings)
}

/// GET /api/settings - 設定取得
pub async fn get_settings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Data<PlatformSettings>>, ApiError> {
    let settings = load_settings(&state.db).await?;
    Ok(Json(Data::new(settings)))
}

/// PUT /api/settings - 設定更新（管理者操作。管理画面の認可は外部）
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<Json<Data<PlatformSettings>>, ApiError> {
    // 存在保証
    load_settings(&state.db).await?;

    if let Some(bps) = req.marketplace_fee_bps {
        if !(0..=10_000).contains(&bps) {
            return Err(ApiError::Validation(
                "marketplace_fee_bps must be within 0..=10000".to_string(),
            ));
        }
    }
    if let Some(bps) = req.instant_fee_bps {
        if !(0..=10_000).contains(&bps) {
            return Err(ApiError::Validation(
                "instant_fee_bps must be within 0..=10000".to_string(),
            ));
        }
    }
    if req.free_threshold.is_some_and(|t| t < 0) {
        return Err(ApiError::Validation("free_threshold must be >= 0".to_string()));
    }
    if req.escrow_release_days.is_some_and(|d| d < 0) {
        return Err(ApiError::Validation("escrow_release_days must be >= 0".to_string()));
    }

    let now = chrono::Utc::now().timestamp();
    sqlx::query(r#"
        UPDATE platform_settings SET
            marketplace_fee_bps = COALESCE(?, marketplace_fee_bps),
            free_threshold = COALESCE(?, free_threshold),
            instant_fee_bps = COALESCE(?, instant_fee_bps),
            escrow_release_days = COALESCE(?, escrow_release_days),
            updated_at = ?
        WHERE id = 1
    "#)
    .bind(req.marketplace_fee_bps)
    .bind(req.free_threshold)
    .bind(req.instant_fee_bps)
    .bind(req.escrow_release_days)
    .bind(now)
    .execute(&state.db)
    .await?;

    let settings = load_settings(&state.db).await?;
    info!("Platform settings updated: fee_bps={}", settings.marketplace_fee_bps);

    Ok(Json(Data::new(settings)))
}
