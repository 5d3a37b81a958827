//! Fee Policy
//! プラットフォーム手数料の純粋計算（取引作成時のスナップショットで呼ぶ）
//!
//! すべて整数演算（セント × bps）。丸めは round-half-up。
//! 取引作成後に設定が変わっても過去の取引は再現可能でなければならない。

use crate::models::PlatformSettings;

/// カードサーチャージ（2%、プラットフォーム負担。売り手には転嫁しない）
pub const CARD_FEE_BPS: i64 = 200;

/// マーケットプレイス手数料の内訳
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub platform_fee: i64,
    pub seller_receives: i64,
}

/// インスタントオファーの内訳（買い手コストを含む）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstantBreakdown {
    pub platform_fee: i64,
    pub seller_receives: i64,
    pub buyer_cost: i64,
}

/// bps 掛け算の round-half-up
fn apply_bps(amount: i64, bps: i64) -> i64 {
    (amount * bps + 5_000) / 10_000
}

/// マーケットプレイス手数料を計算する。
///
/// free_threshold 未満は手数料ゼロ。それ以外は
/// `round(item_price × marketplace_fee_bps)`。
/// 常に `seller_receives + platform_fee == item_price`。
pub fn marketplace_fees(item_price: i64, settings: &PlatformSettings) -> FeeBreakdown {
    let platform_fee = if item_price < settings.free_threshold {
        0
    } else {
        apply_bps(item_price, settings.marketplace_fee_bps)
    };
    FeeBreakdown {
        platform_fee,
        seller_receives: item_price - platform_fee,
    }
}

/// カード決済時のサーチャージ。プラットフォームが吸収する。
pub fn card_surcharge(amount: i64) -> i64 {
    apply_bps(amount, CARD_FEE_BPS)
}

/// インスタントオファー（即時現金オファー）の手数料計算。
/// 買い手コストは item_price そのもの（手数料は売り手受取から控除）。
pub fn instant_offer_fees(item_price: i64, settings: &PlatformSettings) -> InstantBreakdown {
    let platform_fee = apply_bps(item_price, settings.instant_fee_bps);
    InstantBreakdown {
        platform_fee,
        seller_receives: item_price - platform_fee,
        buyer_cost: item_price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> PlatformSettings {
        PlatformSettings::defaults(0)
    }

    #[test]
    fn below_threshold_is_free() {
        // R999.99 < R1,000 → 手数料ゼロ
        let fees = marketplace_fees(99_999, &settings());
        assert_eq!(fees.platform_fee, 0);
        assert_eq!(fees.seller_receives, 99_999);
    }

    #[test]
    fn threshold_is_inclusive() {
        // ちょうど R1,000 から課金される
        let fees = marketplace_fees(100_000, &settings());
        assert_eq!(fees.platform_fee, 5_500);
        assert_eq!(fees.seller_receives, 94_500);
    }

    #[test]
    fn standard_rate_on_r2000() {
        // R2,000 → fee = round(2000 × 0.055) = R110, seller = R1,890
        let fees = marketplace_fees(200_000, &settings());
        assert_eq!(fees.platform_fee, 11_000);
        assert_eq!(fees.seller_receives, 189_000);
    }

    #[test]
    fn no_rounding_leakage() {
        let s = settings();
        for price in [100_000, 100_001, 123_457, 999_999, 1_000_003] {
            let fees = marketplace_fees(price, &s);
            assert_eq!(fees.platform_fee + fees.seller_receives, price);
        }
    }

    #[test]
    fn rounds_half_up() {
        // 9999 × 5.5% = 549.945 → 550 / 9990 × 5.5% = 549.45 → 549
        let s = PlatformSettings {
            free_threshold: 0,
            ..settings()
        };
        assert_eq!(marketplace_fees(9_999, &s).platform_fee, 550);
        assert_eq!(marketplace_fees(9_990, &s).platform_fee, 549);
        // .5 ちょうどは切り上げ: 1000 × 0.05% = 0.5 → 1
        let half = PlatformSettings {
            marketplace_fee_bps: 5,
            free_threshold: 0,
            ..settings()
        };
        assert_eq!(marketplace_fees(1_000, &half).platform_fee, 1);
    }

    #[test]
    fn deterministic_for_same_snapshot() {
        let s = settings();
        assert_eq!(marketplace_fees(250_000, &s), marketplace_fees(250_000, &s));
    }

    #[test]
    fn card_surcharge_is_two_percent() {
        assert_eq!(card_surcharge(200_000), 4_000);
        assert_eq!(card_surcharge(0), 0);
    }

    #[test]
    fn instant_fees_deduct_from_seller() {
        let b = instant_offer_fees(200_000, &settings());
        assert_eq!(b.platform_fee, 20_000);
        assert_eq!(b.seller_receives, 180_000);
        assert_eq!(b.buyer_cost, 200_000);
        assert_eq!(b.platform_fee + b.seller_receives, b.buyer_cost);
    }
}
