//! Transactions API Handlers
//! /api/transactions エンドポイント - 取引ライフサイクル
//!
//! 状態機械: PAYMENT_PENDING → SHIPPED → COMPLETED。
//! DISPUTED は非終端状態のどこからでも、CANCELLED は PAYMENT_PENDING
//! からのみ。DISPUTED 中は自動遷移をすべて凍結する。
//!
//! すべての遷移は「同じ目標状態へのリプレイは no-op 成功、順序違反は
//! Precondition エラー」という冪等セマンティクスを持つ。

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::fees;
use crate::handlers::settings::load_settings;
use crate::models::{
    delivery_status, ledger_status, ledger_type, listing_status, payment_status, tx_status,
    Data, DisputeRequest, ShipRequest, Transaction, TransactionResponse, VerifyPaymentRequest,
};
use crate::notify::{self, NotifyEvent};
use crate::{actor_id, AppState};

// ========================================
// Query Parameters
// ========================================

#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    pub user_id: Option<String>,
    pub status: Option<i32>,
}

// ========================================
// Handlers
// ========================================

/// GET /api/transactions - Transaction一覧取得
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<Data<Vec<TransactionResponse>>>, ApiError> {
    let transactions: Vec<Transaction> = if let Some(user_id) = &query.user_id {
        sqlx::query_as(
            "SELECT * FROM transactions WHERE seller_id = ? OR buyer_id = ? ORDER BY created_at DESC",
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&state.db)
        .await?
    } else {
        sqlx::query_as("SELECT * FROM transactions ORDER BY created_at DESC")
            .fetch_all(&state.db)
            .await?
    };

    let responses: Vec<TransactionResponse> = transactions
        .iter()
        .filter(|t| query.status.map_or(true, |s| t.status == s))
        .map(TransactionResponse::from)
        .collect();

    Ok(Json(Data::new(responses)))
}

/// GET /api/transactions/:transaction_id - Transaction詳細取得
pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
) -> Result<Json<Data<TransactionResponse>>, ApiError> {
    let t = fetch_transaction(&state, &transaction_id).await?;
    Ok(Json(Data::new(TransactionResponse::from(&t))))
}

/// POST /api/transactions/:transaction_id/verify-payment - 支払確定
///
/// 決済ゲートウェイからのイベント。VERIFIED か HELD_ESCROW に確定する。
/// カード決済の場合はプラットフォーム負担のサーチャージを台帳に記録する。
pub async fn verify_payment(
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
    Json(req): Json<VerifyPaymentRequest>,
) -> Result<Json<Data<TransactionResponse>>, ApiError> {
    let now = chrono::Utc::now().timestamp();

    if req.method.trim().is_empty() {
        return Err(ApiError::Validation("method is required".to_string()));
    }

    let t = fetch_transaction(&state, &transaction_id).await?;

    if t.status == tx_status::DISPUTED {
        return Err(ApiError::Conflict("Transaction is disputed; transitions are frozen".to_string()));
    }
    if t.status == tx_status::CANCELLED {
        return Err(ApiError::Conflict("Transaction is cancelled".to_string()));
    }
    // 既に確定済みならリプレイとして同じ成功を返す
    if t.payment_status != payment_status::PENDING {
        return Ok(Json(Data::new(TransactionResponse::from(&t))));
    }

    let target = if req.hold_escrow {
        payment_status::HELD_ESCROW
    } else {
        payment_status::VERIFIED
    };

    let mut db_tx = state.db.begin().await?;

    let updated = sqlx::query(r#"
        UPDATE transactions SET
            payment_status = ?, payment_method = ?, paid_at = ?, updated_at = ?
        WHERE transaction_id = ? AND payment_status = ? AND status = ?
    "#)
    .bind(target)
    .bind(&req.method)
    .bind(now)
    .bind(now)
    .bind(&transaction_id)
    .bind(payment_status::PENDING)
    .bind(tx_status::PAYMENT_PENDING)
    .execute(&mut *db_tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::Conflict("Payment state changed concurrently".to_string()));
    }

    // カードサーチャージはプラットフォームが吸収する（負の収益として記録）
    if req.method == "card" {
        let surcharge = fees::card_surcharge(t.total_amount);
        sqlx::query(r#"
            INSERT INTO ledger_entries (
                entry_id, entry_type, status, amount, platform_revenue,
                transaction_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#)
        .bind(Uuid::new_v4().to_string())
        .bind(ledger_type::CARD_FEE)
        .bind(ledger_status::COMPLETED)
        .bind(surcharge)
        .bind(-surcharge)
        .bind(&transaction_id)
        .bind(now)
        .execute(&mut *db_tx)
        .await?;
    }

    db_tx.commit().await?;

    info!(
        "Payment verified: transaction={}, method={}, escrow={}",
        transaction_id, req.method, req.hold_escrow
    );

    let t = fetch_transaction(&state, &transaction_id).await?;
    Ok(Json(Data::new(TransactionResponse::from(&t))))
}

/// POST /api/transactions/:transaction_id/ship - 発送記録
///
/// 売り手のみ。支払が確定（VERIFIED/HELD_ESCROW）するまで商品は動かせない。
pub async fn ship(
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ShipRequest>,
) -> Result<Json<Data<TransactionResponse>>, ApiError> {
    let actor = actor_id(&headers)?;
    let now = chrono::Utc::now().timestamp();

    if req.tracking_number.trim().is_empty() {
        return Err(ApiError::Validation("tracking_number is required".to_string()));
    }

    let t = fetch_transaction(&state, &transaction_id).await?;

    if actor != t.seller_id {
        return Err(ApiError::Forbidden("Only the seller may record shipment".to_string()));
    }
    if t.status == tx_status::DISPUTED {
        return Err(ApiError::Conflict("Transaction is disputed; transitions are frozen".to_string()));
    }
    if t.status == tx_status::CANCELLED {
        return Err(ApiError::Conflict("Transaction is cancelled".to_string()));
    }
    // 既に発送済みならリプレイとして同じ成功を返す
    if t.delivery_status != delivery_status::NOT_SHIPPED {
        return Ok(Json(Data::new(TransactionResponse::from(&t))));
    }
    if t.payment_status == payment_status::PENDING {
        return Err(ApiError::Precondition(
            "Payment must be verified before shipping".to_string(),
        ));
    }

    let updated = sqlx::query(r#"
        UPDATE transactions SET
            status = ?, delivery_status = ?, tracking_number = ?, courier_name = ?,
            shipped_at = ?, updated_at = ?
        WHERE transaction_id = ? AND status = ? AND delivery_status = ?
          AND payment_status IN (?, ?)
    "#)
    .bind(tx_status::SHIPPED)
    .bind(delivery_status::SHIPPED)
    .bind(&req.tracking_number)
    .bind(&req.courier_name)
    .bind(now)
    .bind(now)
    .bind(&transaction_id)
    .bind(tx_status::PAYMENT_PENDING)
    .bind(delivery_status::NOT_SHIPPED)
    .bind(payment_status::VERIFIED)
    .bind(payment_status::HELD_ESCROW)
    .execute(&state.db)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::Conflict("Transaction state changed concurrently".to_string()));
    }

    info!(
        "Shipment recorded: transaction={}, tracking={}",
        transaction_id, req.tracking_number
    );

    notify::dispatch(NotifyEvent::TransactionShipped {
        transaction_id: transaction_id.clone(),
        buyer_id: t.buyer_id.clone(),
        tracking_number: req.tracking_number.clone(),
    });

    let t = fetch_transaction(&state, &transaction_id).await?;
    Ok(Json(Data::new(TransactionResponse::from(&t))))
}

/// POST /api/transactions/:transaction_id/delivered - 配達記録
///
/// 配送キャリア側からの外部シグナル。delivered_at を記録するだけで、
/// 取引の完了は買い手の確認（confirm-delivery）を待つ。
pub async fn record_delivery(
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
) -> Result<Json<Data<TransactionResponse>>, ApiError> {
    let now = chrono::Utc::now().timestamp();

    let t = fetch_transaction(&state, &transaction_id).await?;

    if t.status == tx_status::DISPUTED {
        return Err(ApiError::Conflict("Transaction is disputed; transitions are frozen".to_string()));
    }
    if t.delivered_at.is_some() {
        return Ok(Json(Data::new(TransactionResponse::from(&t))));
    }
    if t.delivery_status != delivery_status::SHIPPED {
        return Err(ApiError::Precondition("Transaction has not been shipped".to_string()));
    }

    sqlx::query(r#"
        UPDATE transactions SET delivered_at = ?, updated_at = ?
        WHERE transaction_id = ? AND delivery_status = ? AND delivered_at IS NULL
    "#)
    .bind(now)
    .bind(now)
    .bind(&transaction_id)
    .bind(delivery_status::SHIPPED)
    .execute(&state.db)
    .await?;

    info!("Delivery recorded: transaction={}", transaction_id);

    let t = fetch_transaction(&state, &transaction_id).await?;
    Ok(Json(Data::new(TransactionResponse::from(&t))))
}

/// POST /api/transactions/:transaction_id/confirm-delivery - 受取確認
///
/// 買い手のみ。キャリアの配達記録（delivered_at）が先行していなければ
/// ならない。完了時に FEE_CAPTURE 台帳エントリを COMPLETED にし、
/// エスクロー解放日付きの PAYOUT エントリを起票し、完了カウンタを進める。
pub async fn confirm_delivery(
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Data<TransactionResponse>>, ApiError> {
    let actor = actor_id(&headers)?;
    let now = chrono::Utc::now().timestamp();

    let settings = load_settings(&state.db).await?;

    let t = fetch_transaction(&state, &transaction_id).await?;

    if actor != t.buyer_id {
        return Err(ApiError::Forbidden("Only the buyer may confirm delivery".to_string()));
    }
    // 既に完了済みならリプレイとして同じ成功を返す（台帳・カウンタは重複しない）
    if t.status == tx_status::COMPLETED {
        return Ok(Json(Data::new(TransactionResponse::from(&t))));
    }
    if t.status == tx_status::DISPUTED {
        return Err(ApiError::Conflict("Transaction is disputed; transitions are frozen".to_string()));
    }
    if t.status == tx_status::CANCELLED {
        return Err(ApiError::Conflict("Transaction is cancelled".to_string()));
    }
    if t.delivered_at.is_none() {
        return Err(ApiError::Precondition(
            "Carrier delivery has not been recorded".to_string(),
        ));
    }
    if t.payment_status == payment_status::PENDING {
        return Err(ApiError::Precondition(
            "Payment must be verified before completion".to_string(),
        ));
    }

    let mut db_tx = state.db.begin().await?;

    // 条件付き UPDATE をトランザクション先頭に置く。読みから始めると
    // 並行コミット時に書き込み昇格で失敗する。
    let updated = sqlx::query(r#"
        UPDATE transactions SET
            status = ?, delivery_status = ?, completed_at = ?, updated_at = ?
        WHERE transaction_id = ? AND status = ? AND delivered_at IS NOT NULL
          AND payment_status IN (?, ?)
    "#)
    .bind(tx_status::COMPLETED)
    .bind(delivery_status::DELIVERED)
    .bind(now)
    .bind(now)
    .bind(&transaction_id)
    .bind(tx_status::SHIPPED)
    .bind(payment_status::VERIFIED)
    .bind(payment_status::HELD_ESCROW)
    .execute(&mut *db_tx)
    .await?;
    if updated.rows_affected() == 0 {
        db_tx.rollback().await?;
        // 並行する確認に負けた場合、相手が完了させていればリプレイとして成功
        let t = fetch_transaction(&state, &transaction_id).await?;
        if t.status == tx_status::COMPLETED {
            return Ok(Json(Data::new(TransactionResponse::from(&t))));
        }
        return Err(ApiError::Conflict("Transaction state changed concurrently".to_string()));
    }

    // 手数料キャプチャを確定
    sqlx::query(r#"
        UPDATE ledger_entries SET status = ?
        WHERE transaction_id = ? AND entry_type = ? AND status = ?
    "#)
    .bind(ledger_status::COMPLETED)
    .bind(&transaction_id)
    .bind(ledger_type::FEE_CAPTURE)
    .bind(ledger_status::PENDING)
    .execute(&mut *db_tx)
    .await?;

    // 支払スケジュール（実際の送金は外部コラボレータが available_at 以降に実行）
    let available_at = now + settings.escrow_release_days * 86_400;
    let payout_amount = t.seller_payout + t.shipping_cost;
    sqlx::query(r#"
        INSERT INTO ledger_entries (
            entry_id, entry_type, status, amount, to_user_id,
            transaction_id, available_at, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    "#)
    .bind(Uuid::new_v4().to_string())
    .bind(ledger_type::PAYOUT)
    .bind(ledger_status::PENDING)
    .bind(payout_amount)
    .bind(&t.seller_id)
    .bind(&transaction_id)
    .bind(available_at)
    .bind(now)
    .execute(&mut *db_tx)
    .await?;

    // 完了カウンタ（ユーザー行は lazily 作成）
    for user_id in [&t.seller_id, &t.buyer_id] {
        sqlx::query("INSERT OR IGNORE INTO users (user_id, created_at) VALUES (?, ?)")
            .bind(user_id)
            .bind(now)
            .execute(&mut *db_tx)
            .await?;
    }
    sqlx::query("UPDATE users SET sales_count = sales_count + 1 WHERE user_id = ?")
        .bind(&t.seller_id)
        .execute(&mut *db_tx)
        .await?;
    sqlx::query("UPDATE users SET purchases_count = purchases_count + 1 WHERE user_id = ?")
        .bind(&t.buyer_id)
        .execute(&mut *db_tx)
        .await?;

    db_tx.commit().await?;

    info!(
        "Transaction completed: transaction={}, payout={}, available_at={}",
        transaction_id, payout_amount, available_at
    );

    notify::dispatch(NotifyEvent::TransactionCompleted {
        transaction_id: transaction_id.clone(),
        seller_id: t.seller_id.clone(),
    });
    notify::dispatch(NotifyEvent::PayoutScheduled {
        transaction_id: transaction_id.clone(),
        seller_id: t.seller_id.clone(),
        amount: payout_amount,
        available_at,
    });

    let t = fetch_transaction(&state, &transaction_id).await?;
    Ok(Json(Data::new(TransactionResponse::from(&t))))
}

/// POST /api/transactions/:transaction_id/dispute - 紛争申立
///
/// 当事者（買い手または売り手）のみ。COMPLETED/CANCELLED 以外の任意の
/// 状態から可能で、以後の自動遷移を管理者が解決するまで凍結する。
pub async fn file_dispute(
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<DisputeRequest>,
) -> Result<Json<Data<TransactionResponse>>, ApiError> {
    let actor = actor_id(&headers)?;
    let now = chrono::Utc::now().timestamp();

    if req.reason.trim().is_empty() {
        return Err(ApiError::Validation("reason is required".to_string()));
    }

    let t = fetch_transaction(&state, &transaction_id).await?;

    if actor != t.buyer_id && actor != t.seller_id {
        return Err(ApiError::Forbidden("Only transaction parties may file a dispute".to_string()));
    }
    if t.status == tx_status::DISPUTED {
        return Ok(Json(Data::new(TransactionResponse::from(&t))));
    }
    if t.status == tx_status::COMPLETED || t.status == tx_status::CANCELLED {
        return Err(ApiError::Conflict("Terminal transactions cannot be disputed".to_string()));
    }

    let updated = sqlx::query(r#"
        UPDATE transactions SET
            status = ?, disputed_at = ?, dispute_reason = ?, updated_at = ?
        WHERE transaction_id = ? AND status IN (?, ?)
    "#)
    .bind(tx_status::DISPUTED)
    .bind(now)
    .bind(&req.reason)
    .bind(now)
    .bind(&transaction_id)
    .bind(tx_status::PAYMENT_PENDING)
    .bind(tx_status::SHIPPED)
    .execute(&state.db)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::Conflict("Transaction state changed concurrently".to_string()));
    }

    info!("Dispute filed: transaction={}, by={}", transaction_id, actor);

    notify::dispatch(NotifyEvent::DisputeFiled {
        transaction_id: transaction_id.clone(),
        filed_by: actor,
    });

    let t = fetch_transaction(&state, &transaction_id).await?;
    Ok(Json(Data::new(TransactionResponse::from(&t))))
}

/// POST /api/transactions/:transaction_id/cancel - キャンセル
///
/// PAYMENT_PENDING からのみ。Listing を再度 ACTIVE に戻し、PENDING の
/// FEE_CAPTURE 台帳エントリを FAILED にする。
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Data<TransactionResponse>>, ApiError> {
    let actor = actor_id(&headers)?;
    let now = chrono::Utc::now().timestamp();

    let t = fetch_transaction(&state, &transaction_id).await?;

    if actor != t.buyer_id && actor != t.seller_id {
        return Err(ApiError::Forbidden("Only transaction parties may cancel".to_string()));
    }
    if t.status == tx_status::CANCELLED {
        return Ok(Json(Data::new(TransactionResponse::from(&t))));
    }
    if t.status != tx_status::PAYMENT_PENDING {
        return Err(ApiError::Conflict(
            "Only payment-pending transactions can be cancelled".to_string(),
        ));
    }

    let mut db_tx = state.db.begin().await?;

    let updated = sqlx::query(r#"
        UPDATE transactions SET status = ?, cancelled_at = ?, updated_at = ?
        WHERE transaction_id = ? AND status = ?
    "#)
    .bind(tx_status::CANCELLED)
    .bind(now)
    .bind(now)
    .bind(&transaction_id)
    .bind(tx_status::PAYMENT_PENDING)
    .execute(&mut *db_tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::Conflict("Transaction state changed concurrently".to_string()));
    }

    // Listing を再販可能に戻す（SOLD は「非CANCELLEDな取引が存在する」と同値）
    sqlx::query(
        "UPDATE listings SET status = ?, updated_at = ? WHERE listing_id = ? AND status = ?",
    )
    .bind(listing_status::ACTIVE)
    .bind(now)
    .bind(&t.listing_id)
    .bind(listing_status::SOLD)
    .execute(&mut *db_tx)
    .await?;

    sqlx::query(r#"
        UPDATE ledger_entries SET status = ?
        WHERE transaction_id = ? AND entry_type = ? AND status = ?
    "#)
    .bind(ledger_status::FAILED)
    .bind(&transaction_id)
    .bind(ledger_type::FEE_CAPTURE)
    .bind(ledger_status::PENDING)
    .execute(&mut *db_tx)
    .await?;

    db_tx.commit().await?;

    info!("Transaction cancelled: transaction={}, by={}", transaction_id, actor);

    let t = fetch_transaction(&state, &transaction_id).await?;
    Ok(Json(Data::new(TransactionResponse::from(&t))))
}

// ========================================
// Helper Functions
// ========================================

async fn fetch_transaction(
    state: &Arc<AppState>,
    transaction_id: &str,
) -> Result<Transaction, ApiError> {
    let t: Option<Transaction> =
        sqlx::query_as("SELECT * FROM transactions WHERE transaction_id = ?")
            .bind(transaction_id)
            .fetch_optional(&state.db)
            .await?;
    t.ok_or_else(|| ApiError::NotFound("Transaction not found".to_string()))
}
