//! Listings API Handlers
//! /api/listings エンドポイント
//!
//! Listing の販売可能性（status = ACTIVE）が Offer 交渉とインスタント
//! バイヤーの共有資源。SOLD への遷移は必ず条件付き UPDATE で行う。

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::error::ApiError;
use crate::models::{
    listing_status, CreateListingRequest, Data, Listing, ListingResponse,
};
use crate::{generate_id, AppState};

// ========================================
// Query Parameters
// ========================================

#[derive(Debug, Deserialize)]
pub struct ListListingsQuery {
    pub seller_id: Option<String>,
    pub status: Option<i32>,
}

// ========================================
// Handlers
// ========================================

/// POST /api/listings - Listing作成
pub async fn create_listing(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateListingRequest>,
) -> Result<Json<Data<ListingResponse>>, ApiError> {
    if req.asking_price < 0 {
        return Err(ApiError::Validation("asking_price must be >= 0".to_string()));
    }
    if req.shipping_cost.is_some_and(|c| c < 0) {
        return Err(ApiError::Validation("shipping_cost must be >= 0".to_string()));
    }
    if req.title.trim().is_empty() {
        return Err(ApiError::Validation("title is required".to_string()));
    }

    let now = chrono::Utc::now().timestamp();
    let listing_id = generate_id("LST");
    let status = if req.draft { listing_status::DRAFT } else { listing_status::ACTIVE };

    sqlx::query(r#"
        INSERT INTO listings (
            listing_id, seller_id, title, asking_price, shipping_cost,
            status, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    "#)
    .bind(&listing_id)
    .bind(&req.seller_id)
    .bind(&req.title)
    .bind(req.asking_price)
    .bind(req.shipping_cost)
    .bind(status)
    .bind(now)
    .bind(now)
    .execute(&state.db)
    .await?;

    info!("Listing created: listing_id={}, seller={}", listing_id, req.seller_id);

    let listing: Listing = sqlx::query_as("SELECT * FROM listings WHERE listing_id = ?")
        .bind(&listing_id)
        .fetch_one(&state.db)
        .await?;

    Ok(Json(Data::new(ListingResponse::from(&listing))))
}

/// GET /api/listings - Listing一覧取得
pub async fn list_listings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListListingsQuery>,
) -> Result<Json<Data<Vec<ListingResponse>>>, ApiError> {
    let listings: Vec<Listing> = if let Some(seller_id) = &query.seller_id {
        sqlx::query_as(
            "SELECT * FROM listings WHERE seller_id = ? AND status != ? ORDER BY created_at DESC",
        )
        .bind(seller_id)
        .bind(listing_status::REMOVED)
        .fetch_all(&state.db)
        .await?
    } else {
        sqlx::query_as("SELECT * FROM listings WHERE status != ? ORDER BY created_at DESC")
            .bind(listing_status::REMOVED)
            .fetch_all(&state.db)
            .await?
    };

    let responses: Vec<ListingResponse> = listings
        .iter()
        .filter(|l| query.status.map_or(true, |s| l.status == s))
        .map(ListingResponse::from)
        .collect();

    Ok(Json(Data::new(responses)))
}

/// GET /api/listings/:listing_id - Listing詳細取得
pub async fn get_listing(
    State(state): State<Arc<AppState>>,
    Path(listing_id): Path<String>,
) -> Result<Json<Data<ListingResponse>>, ApiError> {
    let listing: Option<Listing> = sqlx::query_as("SELECT * FROM listings WHERE listing_id = ?")
        .bind(&listing_id)
        .fetch_optional(&state.db)
        .await?;

    match listing {
        Some(l) => Ok(Json(Data::new(ListingResponse::from(&l)))),
        None => Err(ApiError::NotFound("Listing not found".to_string())),
    }
}

/// POST /api/listings/:listing_id/activate - DRAFT → ACTIVE
pub async fn activate_listing(
    State(state): State<Arc<AppState>>,
    Path(listing_id): Path<String>,
) -> Result<Json<Data<ListingResponse>>, ApiError> {
    let now = chrono::Utc::now().timestamp();

    let result = sqlx::query(
        "UPDATE listings SET status = ?, updated_at = ? WHERE listing_id = ? AND status = ?",
    )
    .bind(listing_status::ACTIVE)
    .bind(now)
    .bind(&listing_id)
    .bind(listing_status::DRAFT)
    .execute(&state.db)
    .await?;

    let listing: Option<Listing> = sqlx::query_as("SELECT * FROM listings WHERE listing_id = ?")
        .bind(&listing_id)
        .fetch_optional(&state.db)
        .await?;

    let listing = listing.ok_or_else(|| ApiError::NotFound("Listing not found".to_string()))?;

    // 既にACTIVEなら冪等に成功
    if result.rows_affected() == 0 && listing.status != listing_status::ACTIVE {
        return Err(ApiError::Conflict("Listing is not in DRAFT state".to_string()));
    }

    Ok(Json(Data::new(ListingResponse::from(&listing))))
}

/// DELETE /api/listings/:listing_id - Listing削除（ソフトリタイア）
pub async fn remove_listing(
    State(state): State<Arc<AppState>>,
    Path(listing_id): Path<String>,
) -> Result<Json<Data<ListingResponse>>, ApiError> {
    let now = chrono::Utc::now().timestamp();

    // SOLD は引退させられない
    let result = sqlx::query(
        "UPDATE listings SET status = ?, updated_at = ? WHERE listing_id = ? AND status IN (?, ?)",
    )
    .bind(listing_status::REMOVED)
    .bind(now)
    .bind(&listing_id)
    .bind(listing_status::DRAFT)
    .bind(listing_status::ACTIVE)
    .execute(&state.db)
    .await?;

    let listing: Option<Listing> = sqlx::query_as("SELECT * FROM listings WHERE listing_id = ?")
        .bind(&listing_id)
        .fetch_optional(&state.db)
        .await?;

    let listing = listing.ok_or_else(|| ApiError::NotFound("Listing not found".to_string()))?;

    if result.rows_affected() == 0 && listing.status != listing_status::REMOVED {
        return Err(ApiError::Conflict("Sold listings cannot be removed".to_string()));
    }

    info!("Listing removed: listing_id={}", listing_id);

    Ok(Json(Data::new(ListingResponse::from(&listing))))
}
