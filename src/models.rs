//! Data Models
//! Listing, Offer, Transaction, LedgerEntry などのデータ構造定義
//!
//! 金額はすべてマイナー単位（セント）の整数。浮動小数点は使わない。
//! 手数料率は basis points（bps, 1/10000）。時刻は Unix 秒。

use serde::{Deserialize, Serialize};

/// 成功レスポンスのエンベロープ: `{ "data": ... }`
#[derive(Debug, Serialize)]
pub struct Data<T> {
    pub data: T,
}

impl<T> Data<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

// ========================================
// Status Constants
// ========================================

pub mod listing_status {
    pub const DRAFT: i32 = 0;
    pub const ACTIVE: i32 = 1;
    pub const SOLD: i32 = 2;
    pub const REMOVED: i32 = 3;
}

pub mod offer_status {
    pub const PENDING: i32 = 0;
    pub const ACCEPTED: i32 = 1;
    pub const REJECTED: i32 = 2;
    pub const EXPIRED: i32 = 3;
}

pub mod tx_status {
    pub const PAYMENT_PENDING: i32 = 0;
    pub const SHIPPED: i32 = 1;
    pub const DISPUTED: i32 = 2;
    pub const COMPLETED: i32 = 3;
    pub const CANCELLED: i32 = 4;
}

pub mod payment_status {
    pub const PENDING: i32 = 0;
    pub const VERIFIED: i32 = 1;
    pub const HELD_ESCROW: i32 = 2;
}

pub mod delivery_status {
    pub const NOT_SHIPPED: i32 = 0;
    pub const SHIPPED: i32 = 1;
    pub const DELIVERED: i32 = 2;
}

pub mod ledger_type {
    pub const FEE_CAPTURE: i32 = 0;
    pub const PAYOUT: i32 = 1;
    pub const REFUND: i32 = 2;
    pub const CARD_FEE: i32 = 3;
}

pub mod ledger_status {
    pub const PENDING: i32 = 0;
    pub const COMPLETED: i32 = 1;
    pub const FAILED: i32 = 2;
}

/// Offer の有効期限（48時間、秒）
pub const OFFER_TTL_SECS: i64 = 48 * 3600;

// ========================================
// User
// ========================================

/// User (DB row)。認証は外部コラボレータ。完了カウンタのみ保持する。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub user_id: String,
    pub display_name: Option<String>,
    pub sales_count: i64,
    pub purchases_count: i64,
    pub created_at: i64,
}

// ========================================
// Listing
// ========================================

/// Listing (DB row)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Listing {
    pub listing_id: String,
    pub seller_id: String,
    pub title: String,
    pub asking_price: i64,
    pub shipping_cost: Option<i64>,
    pub status: i32,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Listing 作成リクエスト
#[derive(Debug, Deserialize)]
pub struct CreateListingRequest {
    pub seller_id: String,
    pub title: String,
    pub asking_price: i64,
    pub shipping_cost: Option<i64>,
    /// true の場合 DRAFT で作成（デフォルトは ACTIVE）
    #[serde(default)]
    pub draft: bool,
}

/// Listing レスポンス（API返却用）
#[derive(Debug, Serialize)]
pub struct ListingResponse {
    pub listing_id: String,
    pub seller_id: String,
    pub title: String,
    pub asking_price: i64,
    pub shipping_cost: Option<i64>,
    pub status: i32,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&Listing> for ListingResponse {
    fn from(l: &Listing) -> Self {
        Self {
            listing_id: l.listing_id.clone(),
            seller_id: l.seller_id.clone(),
            title: l.title.clone(),
            asking_price: l.asking_price,
            shipping_cost: l.shipping_cost,
            status: l.status,
            created_at: l.created_at,
            updated_at: l.updated_at,
        }
    }
}

// ========================================
// Offer
// ========================================

/// Offer (DB row)
///
/// status は単調：一度 ACCEPTED/REJECTED/EXPIRED になったら二度と遷移しない。
/// カウンターは元の Offer を REJECTED にして新しい PENDING Offer を作る
/// （`countered_from` が履歴リンク）。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Offer {
    pub offer_id: String,
    pub listing_id: String,
    pub buyer_id: String,
    pub amount: i64,
    pub message: Option<String>,
    pub status: i32,
    pub countered_from: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
    pub responded_at: Option<i64>,
}

/// Offer 作成リクエスト
#[derive(Debug, Deserialize)]
pub struct CreateOfferRequest {
    pub listing_id: String,
    pub buyer_id: String,
    pub amount: i64,
    pub message: Option<String>,
}

/// カウンターオファーリクエスト
#[derive(Debug, Deserialize)]
pub struct CounterOfferRequest {
    pub counter_amount: i64,
    pub message: Option<String>,
}

/// Offer レスポンス（API返却用）
#[derive(Debug, Serialize)]
pub struct OfferResponse {
    pub offer_id: String,
    pub listing_id: String,
    pub buyer_id: String,
    pub amount: i64,
    pub message: Option<String>,
    pub status: i32,
    pub countered_from: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
    pub responded_at: Option<i64>,
}

impl From<&Offer> for OfferResponse {
    fn from(o: &Offer) -> Self {
        Self {
            offer_id: o.offer_id.clone(),
            listing_id: o.listing_id.clone(),
            buyer_id: o.buyer_id.clone(),
            amount: o.amount,
            message: o.message.clone(),
            status: o.status,
            countered_from: o.countered_from.clone(),
            created_at: o.created_at,
            expires_at: o.expires_at,
            responded_at: o.responded_at,
        }
    }
}

/// Offer 承諾レスポンス（作成された Transaction を含む）
#[derive(Debug, Serialize)]
pub struct AcceptOfferResponse {
    pub offer: OfferResponse,
    pub transaction: TransactionResponse,
}

// ========================================
// Transaction
// ========================================

/// Transaction (DB row)
///
/// 金額フィールド（item_price/shipping_cost/total_amount/platform_fee/
/// seller_payout）は作成時の設定スナップショットから一度だけ計算し、
/// 以後は管理者の訂正以外で変更しない。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transaction {
    pub transaction_id: String,
    pub listing_id: String,
    pub offer_id: Option<String>,
    pub seller_id: String,
    pub buyer_id: String,
    pub item_price: i64,
    pub shipping_cost: i64,
    pub total_amount: i64,
    pub platform_fee: i64,
    pub seller_payout: i64,
    pub status: i32,
    pub payment_status: i32,
    pub delivery_status: i32,
    pub payment_method: Option<String>,
    pub tracking_number: Option<String>,
    pub courier_name: Option<String>,
    pub dispute_reason: Option<String>,
    pub paid_at: Option<i64>,
    pub shipped_at: Option<i64>,
    pub delivered_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub disputed_at: Option<i64>,
    pub cancelled_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// 支払確認リクエスト（決済ゲートウェイ側からのイベント）
#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    /// "card" の場合はカードサーチャージを台帳に記録する
    pub method: String,
    /// true の場合エスクロー保留（HELD_ESCROW）として確定
    #[serde(default)]
    pub hold_escrow: bool,
}

/// 発送リクエスト
#[derive(Debug, Deserialize)]
pub struct ShipRequest {
    pub tracking_number: String,
    pub courier_name: Option<String>,
}

/// 紛争申立リクエスト
#[derive(Debug, Deserialize)]
pub struct DisputeRequest {
    pub reason: String,
}

/// Transaction レスポンス（API返却用）
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub transaction_id: String,
    pub listing_id: String,
    pub offer_id: Option<String>,
    pub seller_id: String,
    pub buyer_id: String,
    pub item_price: i64,
    pub shipping_cost: i64,
    pub total_amount: i64,
    pub platform_fee: i64,
    pub seller_payout: i64,
    pub status: i32,
    pub payment_status: i32,
    pub delivery_status: i32,
    pub payment_method: Option<String>,
    pub tracking_number: Option<String>,
    pub courier_name: Option<String>,
    pub dispute_reason: Option<String>,
    pub paid_at: Option<i64>,
    pub shipped_at: Option<i64>,
    pub delivered_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub disputed_at: Option<i64>,
    pub cancelled_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&Transaction> for TransactionResponse {
    fn from(t: &Transaction) -> Self {
        Self {
            transaction_id: t.transaction_id.clone(),
            listing_id: t.listing_id.clone(),
            offer_id: t.offer_id.clone(),
            seller_id: t.seller_id.clone(),
            buyer_id: t.buyer_id.clone(),
            item_price: t.item_price,
            shipping_cost: t.shipping_cost,
            total_amount: t.total_amount,
            platform_fee: t.platform_fee,
            seller_payout: t.seller_payout,
            status: t.status,
            payment_status: t.payment_status,
            delivery_status: t.delivery_status,
            payment_method: t.payment_method.clone(),
            tracking_number: t.tracking_number.clone(),
            courier_name: t.courier_name.clone(),
            dispute_reason: t.dispute_reason.clone(),
            paid_at: t.paid_at,
            shipped_at: t.shipped_at,
            delivered_at: t.delivered_at,
            completed_at: t.completed_at,
            disputed_at: t.disputed_at,
            cancelled_at: t.cancelled_at,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

// ========================================
// LedgerEntry
// ========================================

/// LedgerEntry (DB row)
///
/// 追記専用。作成後に変更できるのは status（PENDING→COMPLETED/FAILED）のみ。
/// COMPLETED な FEE_CAPTURE の platform_revenue 合計がプラットフォーム
/// 収益レポートの唯一の情報源。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub entry_id: String,
    pub entry_type: i32,
    pub status: i32,
    pub amount: i64,
    pub platform_revenue: Option<i64>,
    pub from_user_id: Option<String>,
    pub to_user_id: Option<String>,
    pub transaction_id: Option<String>,
    pub available_at: Option<i64>,
    pub created_at: i64,
}

// ========================================
// PlatformSettings
// ========================================

/// PlatformSettings (DB row, シングルトン)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PlatformSettings {
    pub id: i64,
    pub marketplace_fee_bps: i64,
    pub free_threshold: i64,
    pub instant_fee_bps: i64,
    pub escrow_release_days: i64,
    pub updated_at: i64,
}

impl PlatformSettings {
    /// デフォルト設定（初回読み取り時に lazily 作成される）
    pub fn defaults(now: i64) -> Self {
        Self {
            id: 1,
            marketplace_fee_bps: 550,   // 5.5%
            free_threshold: 100_000,    // R1,000（セント）未満は手数料ゼロ
            instant_fee_bps: 1_000,     // 10%
            escrow_release_days: 7,
            updated_at: now,
        }
    }
}

/// 設定更新リクエスト（管理者操作）
#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    pub marketplace_fee_bps: Option<i64>,
    pub free_threshold: Option<i64>,
    pub instant_fee_bps: Option<i64>,
    pub escrow_release_days: Option<i64>,
}
