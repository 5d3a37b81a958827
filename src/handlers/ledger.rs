//! Ledger API Handlers
//! /api/ledger エンドポイント - 追記専用の監査台帳の読み取りモデル
//!
//! エントリは各ライフサイクル遷移のトランザクション内で書き込まれる。
//! ここは読み取りと集計のみ。収益認識は COMPLETED エントリに限る。

use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use sqlx::QueryBuilder;
use std::sync::Arc;

use crate::error::ApiError;
use crate::models::{ledger_status, Data, LedgerEntry};
use crate::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

// ========================================
// Query Parameters
// ========================================

#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    #[serde(rename = "type")]
    pub entry_type: Option<i32>,
    pub status: Option<i32>,
    pub from_user_id: Option<String>,
    pub to_user_id: Option<String>,
    /// Unix秒（この時刻以降）
    pub start_date: Option<i64>,
    /// Unix秒（この時刻より前）
    pub end_date: Option<i64>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

// ========================================
// Response Types
// ========================================

#[derive(Debug, Serialize)]
pub struct LedgerAggregate {
    /// フィルタに一致する全エントリの金額合計
    pub total_amount: i64,
    /// フィルタに一致する COMPLETED エントリのみの収益合計
    pub platform_revenue: i64,
}

#[derive(Debug, Serialize)]
pub struct LedgerPage {
    pub entries: Vec<LedgerEntry>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub aggregate: LedgerAggregate,
}

// ========================================
// Handlers
// ========================================

/// GET /api/ledger - 台帳一覧 + 集計
pub async fn list_ledger(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<Data<LedgerPage>>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = (page - 1) * limit;

    // 集計（COUNT/SUM はページングの影響を受けない）
    let mut agg = QueryBuilder::new(
        "SELECT COUNT(*) AS total, \
         COALESCE(SUM(amount), 0) AS total_amount, \
         COALESCE(SUM(CASE WHEN status = ",
    );
    agg.push_bind(ledger_status::COMPLETED);
    agg.push(" THEN COALESCE(platform_revenue, 0) ELSE 0 END), 0) AS platform_revenue FROM ledger_entries");
    push_filters(&mut agg, &query);

    let (total, total_amount, platform_revenue): (i64, i64, i64) =
        agg.build_query_as().fetch_one(&state.db).await?;

    // エントリ取得
    let mut listing = QueryBuilder::new("SELECT * FROM ledger_entries");
    push_filters(&mut listing, &query);
    listing.push(" ORDER BY created_at DESC, entry_id LIMIT ");
    listing.push_bind(limit);
    listing.push(" OFFSET ");
    listing.push_bind(offset);

    let entries: Vec<LedgerEntry> = listing.build_query_as().fetch_all(&state.db).await?;

    Ok(Json(Data::new(LedgerPage {
        entries,
        total,
        page,
        limit,
        aggregate: LedgerAggregate {
            total_amount,
            platform_revenue,
        },
    })))
}

// ========================================
// Helper Functions
// ========================================

fn push_filters(builder: &mut QueryBuilder<'_, sqlx::Sqlite>, query: &LedgerQuery) {
    let mut has_where = false;
    let sep = |b: &mut QueryBuilder<'_, sqlx::Sqlite>, has: &mut bool| {
        if *has {
            b.push(" AND ");
        } else {
            b.push(" WHERE ");
            *has = true;
        }
    };

    if let Some(t) = query.entry_type {
        sep(builder, &mut has_where);
        builder.push("entry_type = ").push_bind(t);
    }
    if let Some(s) = query.status {
        sep(builder, &mut has_where);
        builder.push("status = ").push_bind(s);
    }
    if let Some(u) = &query.from_user_id {
        sep(builder, &mut has_where);
        builder.push("from_user_id = ").push_bind(u.clone());
    }
    if let Some(u) = &query.to_user_id {
        sep(builder, &mut has_where);
        builder.push("to_user_id = ").push_bind(u.clone());
    }
    if let Some(start) = query.start_date {
        sep(builder, &mut has_where);
        builder.push("created_at >= ").push_bind(start);
    }
    if let Some(end) = query.end_date {
        sep(builder, &mut has_where);
        builder.push("created_at < ").push_bind(end);
    }
}
