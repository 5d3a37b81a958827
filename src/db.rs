//! Database Module
//! SQLite を使用した listings/offers/transactions/ledger の管理

use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use anyhow::Result;
use tracing::info;

/// データベース接続プール
pub type DbPool = Pool<Sqlite>;

/// データベースを初期化
pub async fn init_db(db_path: &str) -> Result<DbPool> {
    // SQLite接続文字列
    let db_url = format!("sqlite:{}?mode=rwc", db_path);

    info!("Initializing database: {}", db_path);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    // スキーマ作成
    create_schema(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

/// スキーマ作成
async fn create_schema(pool: &DbPool) -> Result<()> {
    // users テーブル（完了カウンタのみ。認証/プロビジョニングは外部）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id TEXT PRIMARY KEY,
            display_name TEXT,
            sales_count INTEGER NOT NULL DEFAULT 0,
            purchases_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )
    "#)
    .execute(pool)
    .await?;

    // listings テーブル
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS listings (
            listing_id TEXT PRIMARY KEY,
            seller_id TEXT NOT NULL,
            title TEXT NOT NULL,
            asking_price INTEGER NOT NULL,
            shipping_cost INTEGER,
            status INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
    "#)
    .execute(pool)
    .await?;

    // offers テーブル
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS offers (
            offer_id TEXT PRIMARY KEY,
            listing_id TEXT NOT NULL,
            buyer_id TEXT NOT NULL,
            amount INTEGER NOT NULL,
            message TEXT,
            status INTEGER NOT NULL DEFAULT 0,
            countered_from TEXT,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            responded_at INTEGER,
            FOREIGN KEY (listing_id) REFERENCES listings(listing_id)
        )
    "#)
    .execute(pool)
    .await?;

    // transactions テーブル（金額フィールドは作成時に一度だけ計算、以後不変）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS transactions (
            transaction_id TEXT PRIMARY KEY,
            listing_id TEXT NOT NULL,
            offer_id TEXT,
            seller_id TEXT NOT NULL,
            buyer_id TEXT NOT NULL,
            item_price INTEGER NOT NULL,
            shipping_cost INTEGER NOT NULL DEFAULT 0,
            total_amount INTEGER NOT NULL,
            platform_fee INTEGER NOT NULL,
            seller_payout INTEGER NOT NULL,
            status INTEGER NOT NULL DEFAULT 0,
            payment_status INTEGER NOT NULL DEFAULT 0,
            delivery_status INTEGER NOT NULL DEFAULT 0,
            payment_method TEXT,
            tracking_number TEXT,
            courier_name TEXT,
            dispute_reason TEXT,
            paid_at INTEGER,
            shipped_at INTEGER,
            delivered_at INTEGER,
            completed_at INTEGER,
            disputed_at INTEGER,
            cancelled_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (listing_id) REFERENCES listings(listing_id),
            FOREIGN KEY (offer_id) REFERENCES offers(offer_id)
        )
    "#)
    .execute(pool)
    .await?;

    // ledger_entries テーブル（追記専用。status 以外は作成後変更しない）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS ledger_entries (
            entry_id TEXT PRIMARY KEY,
            entry_type INTEGER NOT NULL,
            status INTEGER NOT NULL DEFAULT 0,
            amount INTEGER NOT NULL,
            platform_revenue INTEGER,
            from_user_id TEXT,
            to_user_id TEXT,
            transaction_id TEXT,
            available_at INTEGER,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (transaction_id) REFERENCES transactions(transaction_id)
        )
    "#)
    .execute(pool)
    .await?;

    // platform_settings テーブル（シングルトン。初回読み取り時にデフォルト作成）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS platform_settings (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            marketplace_fee_bps INTEGER NOT NULL,
            free_threshold INTEGER NOT NULL,
            instant_fee_bps INTEGER NOT NULL,
            escrow_release_days INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
    "#)
    .execute(pool)
    .await?;

    // インデックス作成
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_listings_seller ON listings(seller_id)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_listings_status ON listings(status)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_offers_listing ON offers(listing_id)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_offers_buyer ON offers(buyer_id)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_offers_status_expiry ON offers(status, expires_at)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_transactions_listing ON transactions(listing_id)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_transactions_seller ON transactions(seller_id)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_transactions_buyer ON transactions(buyer_id)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ledger_tx ON ledger_entries(transaction_id)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ledger_type_status ON ledger_entries(entry_type, status)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ledger_created ON ledger_entries(created_at)")
        .execute(pool).await?;

    Ok(())
}
