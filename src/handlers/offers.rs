//! Offers API Handlers
//! /api/offers エンドポイント - オファー交渉の状態機械
//!
//! PENDING が唯一の非終端状態。accept / reject / counter / expire で遷移し、
//! 終端化したオファーは二度と遷移しない。承諾は「オファー承諾 + Listing の
//! SOLD 化 + 兄弟オファーの失効 + Transaction 作成 + 台帳記録」を単一の
//! SQLite トランザクションで行う。半端に適用された承諾は二重販売を許すため。

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::fees;
use crate::handlers::settings::load_settings;
use crate::models::{
    ledger_status, ledger_type, listing_status, offer_status, tx_status,
    AcceptOfferResponse, CounterOfferRequest, CreateOfferRequest, Data, Listing, Offer,
    OfferResponse, Transaction, TransactionResponse, OFFER_TTL_SECS,
};
use crate::notify::{self, NotifyEvent};
use crate::{actor_id, generate_id, AppState};

// ========================================
// Handlers
// ========================================

/// POST /api/offers - Offer作成
pub async fn create_offer(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOfferRequest>,
) -> Result<(StatusCode, Json<Data<OfferResponse>>), ApiError> {
    let now = chrono::Utc::now().timestamp();

    if req.amount <= 0 {
        return Err(ApiError::Validation("amount must be > 0".to_string()));
    }

    let listing: Option<Listing> = sqlx::query_as("SELECT * FROM listings WHERE listing_id = ?")
        .bind(&req.listing_id)
        .fetch_optional(&state.db)
        .await?;

    let listing = listing.ok_or_else(|| ApiError::NotFound("Listing not found".to_string()))?;

    if req.buyer_id == listing.seller_id {
        return Err(ApiError::Validation("Sellers cannot make offers on their own listing".to_string()));
    }
    // 最低オファー額: 提示価格の50%（境界を含む）。整数演算で比較する。
    if req.amount * 2 < listing.asking_price {
        return Err(ApiError::Validation(format!(
            "amount is below the minimum offer of {} (50% of asking price)",
            (listing.asking_price + 1) / 2
        )));
    }

    // ACTIVE チェックと INSERT は単一文で行う。別々だと読みと書きの間に
    // 承諾がコミットし、SOLD な Listing に PENDING オファーが残る。
    let offer_id = generate_id("OFF");
    let inserted = sqlx::query(r#"
        INSERT INTO offers (
            offer_id, listing_id, buyer_id, amount, message,
            status, created_at, expires_at
        )
        SELECT ?, listing_id, ?, ?, ?, ?, ?, ?
        FROM listings WHERE listing_id = ? AND status = ?
    "#)
    .bind(&offer_id)
    .bind(&req.buyer_id)
    .bind(req.amount)
    .bind(&req.message)
    .bind(offer_status::PENDING)
    .bind(now)
    .bind(now + OFFER_TTL_SECS)
    .bind(&req.listing_id)
    .bind(listing_status::ACTIVE)
    .execute(&state.db)
    .await?;
    if inserted.rows_affected() == 0 {
        return Err(ApiError::Conflict("Listing is not available for offers".to_string()));
    }

    info!(
        "Offer created: offer_id={}, listing={}, amount={}",
        offer_id, req.listing_id, req.amount
    );

    let offer: Offer = sqlx::query_as("SELECT * FROM offers WHERE offer_id = ?")
        .bind(&offer_id)
        .fetch_one(&state.db)
        .await?;

    notify::dispatch(NotifyEvent::OfferCreated {
        offer_id: offer.offer_id.clone(),
        listing_id: listing.listing_id,
        seller_id: listing.seller_id,
    });

    Ok((StatusCode::CREATED, Json(Data::new(OfferResponse::from(&offer)))))
}

/// GET /api/offers/:offer_id - Offer詳細取得
pub async fn get_offer(
    State(state): State<Arc<AppState>>,
    Path(offer_id): Path<String>,
) -> Result<Json<Data<OfferResponse>>, ApiError> {
    lazy_expire_offer(&state, &offer_id).await?;

    let offer: Option<Offer> = sqlx::query_as("SELECT * FROM offers WHERE offer_id = ?")
        .bind(&offer_id)
        .fetch_optional(&state.db)
        .await?;

    match offer {
        Some(o) => Ok(Json(Data::new(OfferResponse::from(&o)))),
        None => Err(ApiError::NotFound("Offer not found".to_string())),
    }
}

/// GET /api/listings/:listing_id/offers - Listing別Offer一覧
pub async fn list_listing_offers(
    State(state): State<Arc<AppState>>,
    Path(listing_id): Path<String>,
) -> Result<Json<Data<Vec<OfferResponse>>>, ApiError> {
    let now = chrono::Utc::now().timestamp();

    // 期限切れのPENDINGオファーをクエリ時に自動失効
    sqlx::query(
        "UPDATE offers SET status = ? WHERE listing_id = ? AND status = ? AND expires_at <= ?",
    )
    .bind(offer_status::EXPIRED)
    .bind(&listing_id)
    .bind(offer_status::PENDING)
    .bind(now)
    .execute(&state.db)
    .await?;

    let offers: Vec<Offer> =
        sqlx::query_as("SELECT * FROM offers WHERE listing_id = ? ORDER BY created_at DESC")
            .bind(&listing_id)
            .fetch_all(&state.db)
            .await?;

    let responses: Vec<OfferResponse> = offers.iter().map(OfferResponse::from).collect();
    Ok(Json(Data::new(responses)))
}

/// POST /api/offers/:offer_id/accept - Offer承諾
///
/// 承諾・Listing の SOLD 化・兄弟オファー失効・Transaction 作成・
/// FEE_CAPTURE 台帳記録を一つの原子単位で行う。負けた同時承諾は 409。
pub async fn accept_offer(
    State(state): State<Arc<AppState>>,
    Path(offer_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Data<AcceptOfferResponse>>, ApiError> {
    let actor = actor_id(&headers)?;
    let now = chrono::Utc::now().timestamp();

    // 手数料は承諾時点の設定スナップショットで確定する
    let settings = load_settings(&state.db).await?;

    let mut db_tx = state.db.begin().await?;

    // 期限切れならまず失効させる（失効済みオファーは承諾できない）
    sqlx::query(
        "UPDATE offers SET status = ? WHERE offer_id = ? AND status = ? AND expires_at <= ?",
    )
    .bind(offer_status::EXPIRED)
    .bind(&offer_id)
    .bind(offer_status::PENDING)
    .bind(now)
    .execute(&mut *db_tx)
    .await?;

    let offer: Option<Offer> = sqlx::query_as("SELECT * FROM offers WHERE offer_id = ?")
        .bind(&offer_id)
        .fetch_optional(&mut *db_tx)
        .await?;
    let offer = offer.ok_or_else(|| ApiError::NotFound("Offer not found".to_string()))?;

    let listing: Listing = sqlx::query_as("SELECT * FROM listings WHERE listing_id = ?")
        .bind(&offer.listing_id)
        .fetch_one(&mut *db_tx)
        .await?;

    if actor != listing.seller_id {
        return Err(ApiError::Forbidden("Only the listing seller may accept offers".to_string()));
    }

    // 既に承諾済みで Transaction が存在するならリトライとみなし同じ成功を返す
    if offer.status == offer_status::ACCEPTED {
        let existing: Option<Transaction> =
            sqlx::query_as("SELECT * FROM transactions WHERE offer_id = ?")
                .bind(&offer.offer_id)
                .fetch_optional(&mut *db_tx)
                .await?;
        if let Some(t) = existing {
            return Ok(Json(Data::new(AcceptOfferResponse {
                offer: OfferResponse::from(&offer),
                transaction: TransactionResponse::from(&t),
            })));
        }
    }

    if offer.status != offer_status::PENDING {
        return Err(ApiError::Conflict("Offer is not PENDING".to_string()));
    }

    // ステータス条件付きUPDATE。0行なら並行リクエストに負けている。
    let updated = sqlx::query(
        "UPDATE offers SET status = ?, responded_at = ? WHERE offer_id = ? AND status = ?",
    )
    .bind(offer_status::ACCEPTED)
    .bind(now)
    .bind(&offer.offer_id)
    .bind(offer_status::PENDING)
    .execute(&mut *db_tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::Conflict("Offer is not PENDING".to_string()));
    }

    // Listing の販売可能性ゲート: ACTIVE → SOLD を同じ原子単位で check-and-set
    let sold = sqlx::query(
        "UPDATE listings SET status = ?, updated_at = ? WHERE listing_id = ? AND status = ?",
    )
    .bind(listing_status::SOLD)
    .bind(now)
    .bind(&listing.listing_id)
    .bind(listing_status::ACTIVE)
    .execute(&mut *db_tx)
    .await?;
    if sold.rows_affected() == 0 {
        // ロールバックで承諾も取り消される
        return Err(ApiError::Conflict("Listing is no longer available".to_string()));
    }

    // Listing は一度しか売れないため、兄弟の PENDING オファーを同時に失効させる
    sqlx::query("UPDATE offers SET status = ? WHERE listing_id = ? AND status = ?")
        .bind(offer_status::EXPIRED)
        .bind(&listing.listing_id)
        .bind(offer_status::PENDING)
        .execute(&mut *db_tx)
        .await?;

    // Transaction 作成（金額はここで一度だけ確定）
    let item_price = offer.amount;
    let shipping_cost = listing.shipping_cost.unwrap_or(0);
    let total_amount = item_price + shipping_cost;
    let breakdown = fees::marketplace_fees(item_price, &settings);

    let transaction_id = generate_id("TXN");
    sqlx::query(r#"
        INSERT INTO transactions (
            transaction_id, listing_id, offer_id, seller_id, buyer_id,
            item_price, shipping_cost, total_amount, platform_fee, seller_payout,
            status, payment_status, delivery_status, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?)
    "#)
    .bind(&transaction_id)
    .bind(&listing.listing_id)
    .bind(&offer.offer_id)
    .bind(&listing.seller_id)
    .bind(&offer.buyer_id)
    .bind(item_price)
    .bind(shipping_cost)
    .bind(total_amount)
    .bind(breakdown.platform_fee)
    .bind(breakdown.seller_receives)
    .bind(tx_status::PAYMENT_PENDING)
    .bind(now)
    .bind(now)
    .execute(&mut *db_tx)
    .await?;

    // 手数料キャプチャの台帳エントリ（PENDING で起票、完了時に COMPLETED）
    sqlx::query(r#"
        INSERT INTO ledger_entries (
            entry_id, entry_type, status, amount, platform_revenue,
            from_user_id, transaction_id, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    "#)
    .bind(Uuid::new_v4().to_string())
    .bind(ledger_type::FEE_CAPTURE)
    .bind(ledger_status::PENDING)
    .bind(breakdown.platform_fee)
    .bind(breakdown.platform_fee)
    .bind(&offer.buyer_id)
    .bind(&transaction_id)
    .bind(now)
    .execute(&mut *db_tx)
    .await?;

    db_tx.commit().await?;

    info!(
        "Offer accepted: offer_id={}, listing={}, transaction={}",
        offer.offer_id, listing.listing_id, transaction_id
    );

    // 通知はコミット後の fire-and-forget
    notify::dispatch(NotifyEvent::OfferAccepted {
        offer_id: offer.offer_id.clone(),
        transaction_id: transaction_id.clone(),
        buyer_id: offer.buyer_id.clone(),
    });

    let offer: Offer = sqlx::query_as("SELECT * FROM offers WHERE offer_id = ?")
        .bind(&offer.offer_id)
        .fetch_one(&state.db)
        .await?;
    let transaction: Transaction =
        sqlx::query_as("SELECT * FROM transactions WHERE transaction_id = ?")
            .bind(&transaction_id)
            .fetch_one(&state.db)
            .await?;

    Ok(Json(Data::new(AcceptOfferResponse {
        offer: OfferResponse::from(&offer),
        transaction: TransactionResponse::from(&transaction),
    })))
}

/// POST /api/offers/:offer_id/reject - Offer拒否
pub async fn reject_offer(
    State(state): State<Arc<AppState>>,
    Path(offer_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Data<OfferResponse>>, ApiError> {
    let actor = actor_id(&headers)?;
    let now = chrono::Utc::now().timestamp();

    lazy_expire_offer(&state, &offer_id).await?;

    let offer: Option<Offer> = sqlx::query_as("SELECT * FROM offers WHERE offer_id = ?")
        .bind(&offer_id)
        .fetch_optional(&state.db)
        .await?;
    let offer = offer.ok_or_else(|| ApiError::NotFound("Offer not found".to_string()))?;

    let listing: Listing = sqlx::query_as("SELECT * FROM listings WHERE listing_id = ?")
        .bind(&offer.listing_id)
        .fetch_one(&state.db)
        .await?;

    if actor != listing.seller_id {
        return Err(ApiError::Forbidden("Only the listing seller may reject offers".to_string()));
    }

    // 既に拒否済みならリトライとして同じ成功を返す
    if offer.status == offer_status::REJECTED {
        return Ok(Json(Data::new(OfferResponse::from(&offer))));
    }
    if offer.status != offer_status::PENDING {
        return Err(ApiError::Conflict("Offer is not PENDING".to_string()));
    }

    let updated = sqlx::query(
        "UPDATE offers SET status = ?, responded_at = ? WHERE offer_id = ? AND status = ?",
    )
    .bind(offer_status::REJECTED)
    .bind(now)
    .bind(&offer_id)
    .bind(offer_status::PENDING)
    .execute(&state.db)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::Conflict("Offer is not PENDING".to_string()));
    }

    info!("Offer rejected: offer_id={}", offer_id);

    notify::dispatch(NotifyEvent::OfferRejected {
        offer_id: offer_id.clone(),
        buyer_id: offer.buyer_id.clone(),
    });

    let offer: Offer = sqlx::query_as("SELECT * FROM offers WHERE offer_id = ?")
        .bind(&offer_id)
        .fetch_one(&state.db)
        .await?;

    Ok(Json(Data::new(OfferResponse::from(&offer))))
}

/// POST /api/offers/:offer_id/counter - カウンターオファー
///
/// 元のオファーを REJECTED にし、同じ買い手/Listing で新しい PENDING
/// オファーを原子的に作る。履歴はその場で書き換えない。
pub async fn counter_offer(
    State(state): State<Arc<AppState>>,
    Path(offer_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<CounterOfferRequest>,
) -> Result<Json<Data<OfferResponse>>, ApiError> {
    let actor = actor_id(&headers)?;
    let now = chrono::Utc::now().timestamp();

    if req.counter_amount <= 0 {
        return Err(ApiError::Validation("counter_amount must be > 0".to_string()));
    }

    let mut db_tx = state.db.begin().await?;

    sqlx::query(
        "UPDATE offers SET status = ? WHERE offer_id = ? AND status = ? AND expires_at <= ?",
    )
    .bind(offer_status::EXPIRED)
    .bind(&offer_id)
    .bind(offer_status::PENDING)
    .bind(now)
    .execute(&mut *db_tx)
    .await?;

    let offer: Option<Offer> = sqlx::query_as("SELECT * FROM offers WHERE offer_id = ?")
        .bind(&offer_id)
        .fetch_optional(&mut *db_tx)
        .await?;
    let offer = offer.ok_or_else(|| ApiError::NotFound("Offer not found".to_string()))?;

    let listing: Listing = sqlx::query_as("SELECT * FROM listings WHERE listing_id = ?")
        .bind(&offer.listing_id)
        .fetch_one(&mut *db_tx)
        .await?;

    if actor != listing.seller_id {
        return Err(ApiError::Forbidden("Only the listing seller may counter offers".to_string()));
    }

    let updated = sqlx::query(
        "UPDATE offers SET status = ?, responded_at = ? WHERE offer_id = ? AND status = ?",
    )
    .bind(offer_status::REJECTED)
    .bind(now)
    .bind(&offer_id)
    .bind(offer_status::PENDING)
    .execute(&mut *db_tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::Conflict("Offer is not PENDING".to_string()));
    }

    let counter_id = generate_id("OFF");
    sqlx::query(r#"
        INSERT INTO offers (
            offer_id, listing_id, buyer_id, amount, message,
            status, countered_from, created_at, expires_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
    "#)
    .bind(&counter_id)
    .bind(&offer.listing_id)
    .bind(&offer.buyer_id)
    .bind(req.counter_amount)
    .bind(&req.message)
    .bind(offer_status::PENDING)
    .bind(&offer.offer_id)
    .bind(now)
    .bind(now + OFFER_TTL_SECS)
    .execute(&mut *db_tx)
    .await?;

    db_tx.commit().await?;

    info!(
        "Offer countered: original={}, counter={}, amount={}",
        offer_id, counter_id, req.counter_amount
    );

    notify::dispatch(NotifyEvent::OfferCountered {
        original_offer_id: offer_id.clone(),
        counter_offer_id: counter_id.clone(),
        buyer_id: offer.buyer_id.clone(),
    });

    let counter: Offer = sqlx::query_as("SELECT * FROM offers WHERE offer_id = ?")
        .bind(&counter_id)
        .fetch_one(&state.db)
        .await?;

    Ok(Json(Data::new(OfferResponse::from(&counter))))
}

// ========================================
// Background Job (期限切れ自動処理)
// ========================================

/// 期限切れの PENDING オファーを失効させる（定期実行用）。
/// 冪等で、並行実行しても安全。
pub async fn expire_offers(state: &Arc<AppState>) -> anyhow::Result<usize> {
    let now = chrono::Utc::now().timestamp();

    let result = sqlx::query("UPDATE offers SET status = ? WHERE status = ? AND expires_at <= ?")
        .bind(offer_status::EXPIRED)
        .bind(offer_status::PENDING)
        .bind(now)
        .execute(&state.db)
        .await?;

    let count = result.rows_affected() as usize;
    if count > 0 {
        info!("Expired {} offers", count);
    }
    Ok(count)
}

// ========================================
// Helper Functions
// ========================================

/// 単一オファーの読み取り時 lazy 失効
async fn lazy_expire_offer(state: &Arc<AppState>, offer_id: &str) -> Result<(), ApiError> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        "UPDATE offers SET status = ? WHERE offer_id = ? AND status = ? AND expires_at <= ?",
    )
    .bind(offer_status::EXPIRED)
    .bind(offer_id)
    .bind(offer_status::PENDING)
    .bind(now)
    .execute(&state.db)
    .await?;
    Ok(())
}
