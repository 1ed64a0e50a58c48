use chrono::{DateTime, NaiveDate, Utc};
use mls_ledger::{CommissionBucket, Money, Rank, WalletType};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberRow {
    pub id: i64,
    /// Referral parent. `None` for the root.
    pub parent_id: Option<i64>,
    pub username: String,
    pub rank: Rank,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductRow {
    pub id: i64,
    pub name: String,
    pub price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderRow {
    pub id: i64,
    pub member_id: i64,
    pub product_id: i64,
    pub value: Money,
    pub paid: Money,
    /// Always `value - paid`.
    pub pending: Money,
    pub settled: bool,
    pub created_at: DateTime<Utc>,
    /// Set when `pending` reaches zero.
    pub completed_at: Option<DateTime<Utc>>,

    /// Aggregate customer accumulator; equals `commission_customer_share`.
    pub commission_customer: Money,
    pub commission_customer_max: Money,
    pub commission_customer_share: Money,
    /// Gratitude is bounded by the fixed pool, not by a cap column.
    pub commission_customer_gratitude: Money,

    /// Aggregate sale accumulator; equals `sale1 + sale2 + sale3`.
    pub commission_sale: Money,
    pub commission_sale_max: Money,
    pub commission_sale1: Money,
    pub commission_sale2: Money,
    pub commission_sale3: Money,
}

impl OrderRow {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn bucket(&self, bucket: CommissionBucket) -> Money {
        match bucket {
            CommissionBucket::CustomerShare => self.commission_customer_share,
            CommissionBucket::CustomerGratitude => self.commission_customer_gratitude,
            CommissionBucket::Sale1 => self.commission_sale1,
            CommissionBucket::Sale2 => self.commission_sale2,
            CommissionBucket::Sale3 => self.commission_sale3,
        }
    }

    /// Remaining customer-share headroom.
    pub fn customer_headroom(&self) -> Money {
        self.commission_customer
            .headroom_below(self.commission_customer_max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletRow {
    pub id: i64,
    pub member_id: i64,
    pub wallet_type: WalletType,
    pub available: Money,
    /// Lifetime credits; debits only reduce `available`.
    pub total: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletDetailRow {
    pub id: i64,
    pub wallet_id: i64,
    pub value: Money,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacementRow {
    pub id: i64,
    pub order_id: i64,
    pub member_id: i64,
    /// Parent placement id. `None` for the root.
    pub parent_id: Option<i64>,
}

/// Which distribution rule produced an [`NewOrderDetail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DetailRule {
    CustomerPool,
    Gratitude,
    GratitudeHouse,
    Unilevel,
    RankPool,
    ComboConversion,
}

impl DetailRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailRule::CustomerPool => "CUSTOMER_POOL",
            DetailRule::Gratitude => "GRATITUDE",
            DetailRule::GratitudeHouse => "GRATITUDE_HOUSE",
            DetailRule::Unilevel => "UNILEVEL",
            DetailRule::RankPool => "RANK_POOL",
            DetailRule::ComboConversion => "COMBO_CONVERSION",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "CUSTOMER_POOL" => Ok(DetailRule::CustomerPool),
            "GRATITUDE" => Ok(DetailRule::Gratitude),
            "GRATITUDE_HOUSE" => Ok(DetailRule::GratitudeHouse),
            "UNILEVEL" => Ok(DetailRule::Unilevel),
            "RANK_POOL" => Ok(DetailRule::RankPool),
            "COMBO_CONVERSION" => Ok(DetailRule::ComboConversion),
            other => Err(anyhow::anyhow!("invalid detail rule: {other}")),
        }
    }
}

/// Audit record: which member received how much from `order_id`, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewOrderDetail {
    pub order_id: i64,
    pub member_id: i64,
    pub wallet_type: WalletType,
    pub rule: DetailRule,
    pub value: Money,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWalletDetail {
    pub wallet_id: i64,
    pub value: Money,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

/// An order created by the payback path. `pending` is derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub member_id: i64,
    pub product_id: i64,
    pub value: Money,
    pub paid: Money,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewOrderPay {
    pub order_id: i64,
    pub pay_date: NaiveDate,
    pub value: Money,
    pub note: String,
    pub created_by: String,
}
