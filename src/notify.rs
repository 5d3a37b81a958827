//! Notification Dispatch
//! 通知/メールは外部コラボレータへの fire-and-forget ハンドオフ
//!
//! 金銭を動かす遷移のコミット後にのみ呼ぶこと。配送失敗はログに残すだけで、
//! 呼び出し元の結果には決して影響させない。

use serde::Serialize;
use tracing::{info, warn};

/// 通知イベント（外部配送キューに渡すペイロード）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotifyEvent {
    OfferCreated {
        offer_id: String,
        listing_id: String,
        seller_id: String,
    },
    OfferAccepted {
        offer_id: String,
        transaction_id: String,
        buyer_id: String,
    },
    OfferRejected {
        offer_id: String,
        buyer_id: String,
    },
    OfferCountered {
        original_offer_id: String,
        counter_offer_id: String,
        buyer_id: String,
    },
    TransactionShipped {
        transaction_id: String,
        buyer_id: String,
        tracking_number: String,
    },
    TransactionCompleted {
        transaction_id: String,
        seller_id: String,
    },
    DisputeFiled {
        transaction_id: String,
        filed_by: String,
    },
    PayoutScheduled {
        transaction_id: String,
        seller_id: String,
        amount: i64,
        available_at: i64,
    },
}

/// イベントを非同期に配送する。失敗は warn ログのみ。
pub fn dispatch(event: NotifyEvent) {
    tokio::spawn(async move {
        if let Err(e) = deliver(&event).await {
            warn!("Notification delivery failed (ignored): {}", e);
        }
    });
}

/// 外部配送キューへの受け渡し。ここでは構造化ログに書き出す。
async fn deliver(event: &NotifyEvent) -> anyhow::Result<()> {
    let payload = serde_json::to_string(event)?;
    info!(target: "notify", "{}", payload);
    Ok(())
}
