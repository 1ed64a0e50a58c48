//! Settlement constants, overridable from the `/settlement` config section.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use mls_config::{read_string, read_u64};
use mls_ledger::{Money, Rank, Rate};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GratitudePolicy {
    /// Ceiling on ancestors visited by the cascade.
    pub max_levels: u32,
    pub reference_value: Money,
    /// Pool = `reference_value × pool_rate`.
    pub pool_rate: Rate,
    /// Receives whatever the visited levels do not.
    pub house_member_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionPolicy {
    /// Minimum downline revenue before the ladder is evaluated.
    pub revenue_threshold: Money,
    pub min_children: usize,
    /// Sale cap on promotion: trigger value × this.
    pub cap_multiplier: i64,
    /// Sale cap floor when a rung qualifies without a rank change.
    pub refresh_multiplier: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementPolicy {
    pub customer_pool_rate: Rate,
    pub gratitude: GratitudePolicy,
    /// Level 1 first.
    pub unilevel_rates: Vec<Rate>,
    /// Ascending tiers; each pays members at or above the tier.
    pub rank_pool_rates: Vec<(Rank, Rate)>,
    /// Soft boundary for rank holders, as a share of `commission_sale_max`.
    pub rank_soft_cap: Rate,
    pub customer_cap_multiplier: i64,
    pub sale_cap_multiplier: i64,
    pub promotion: PromotionPolicy,
    /// Business timezone for pay dates.
    pub business_utc_offset_hours: i32,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            customer_pool_rate: Rate::percent(15),
            gratitude: GratitudePolicy {
                max_levels: 21,
                reference_value: Money::from_units(3_450_000),
                pool_rate: Rate::percent(7),
                house_member_id: 8080,
            },
            unilevel_rates: vec![Rate::percent(4), Rate::percent(5), Rate::percent(7)],
            rank_pool_rates: vec![
                (Rank::V1, Rate::percent(6)),
                (Rank::V2, Rate::percent(9)),
                (Rank::V3, Rate::percent(10)),
                (Rank::V4, Rate::percent(11)),
                (Rank::V5, Rate::percent(12)),
            ],
            rank_soft_cap: Rate::percent(90),
            customer_cap_multiplier: 2,
            sale_cap_multiplier: 10,
            promotion: PromotionPolicy {
                revenue_threshold: Money::from_units(69_000_000),
                min_children: 3,
                cap_multiplier: 10,
                refresh_multiplier: 3,
            },
            business_utc_offset_hours: 7,
        }
    }
}

fn pct_at(config_json: &Value, pointer: &str) -> Result<Option<Rate>> {
    match read_u64(config_json, pointer)? {
        None => Ok(None),
        Some(p) if p <= 100 => Ok(Some(Rate::percent(p as u32))),
        Some(p) => bail!("CONFIG_INVALID {pointer}: {p} is not a percentage"),
    }
}

fn money_at(config_json: &Value, pointer: &str) -> Result<Option<Money>> {
    read_string(config_json, pointer)?
        .map(|s| {
            Money::parse_decimal(&s).with_context(|| format!("CONFIG_INVALID {pointer}"))
        })
        .transpose()
}

fn positive_int_at(config_json: &Value, pointer: &str) -> Result<Option<i64>> {
    match read_u64(config_json, pointer)? {
        None => Ok(None),
        Some(0) => bail!("CONFIG_INVALID {pointer}: must be positive"),
        Some(n) => i64::try_from(n)
            .map(Some)
            .with_context(|| format!("CONFIG_INVALID {pointer}: out of range")),
    }
}

impl SettlementPolicy {
    /// Defaults overlaid with whatever `/settlement/...` keys are present.
    pub fn from_config_json(config_json: &Value) -> Result<Self> {
        let mut p = Self::default();

        if let Some(r) = pct_at(config_json, "/settlement/customer_pool_pct")? {
            p.customer_pool_rate = r;
        }

        if let Some(n) = positive_int_at(config_json, "/settlement/gratitude/max_levels")? {
            p.gratitude.max_levels =
                u32::try_from(n).context("CONFIG_INVALID /settlement/gratitude/max_levels")?;
        }
        if let Some(m) = money_at(config_json, "/settlement/gratitude/reference_value")? {
            p.gratitude.reference_value = m;
        }
        if let Some(r) = pct_at(config_json, "/settlement/gratitude/pool_pct")? {
            p.gratitude.pool_rate = r;
        }
        if let Some(id) = positive_int_at(config_json, "/settlement/gratitude/house_member_id")? {
            p.gratitude.house_member_id = id;
        }

        if let Some(levels) = config_json.pointer("/settlement/unilevel_pcts") {
            let arr = levels
                .as_array()
                .context("CONFIG_INVALID /settlement/unilevel_pcts: expected a list")?;
            let mut rates = Vec::with_capacity(arr.len());
            for i in 0..arr.len() {
                let ptr = format!("/settlement/unilevel_pcts/{i}");
                rates.push(pct_at(config_json, &ptr)?.with_context(|| format!("CONFIG_INVALID {ptr}"))?);
            }
            p.unilevel_rates = rates;
        }

        for (tier, rate) in p.rank_pool_rates.iter_mut() {
            let ptr = format!("/settlement/rank_pool_pcts/{}", tier_key(*tier));
            if let Some(r) = pct_at(config_json, &ptr)? {
                *rate = r;
            }
        }

        if let Some(r) = pct_at(config_json, "/settlement/rank_soft_cap_pct")? {
            p.rank_soft_cap = r;
        }
        if let Some(n) = positive_int_at(config_json, "/settlement/caps/customer_multiplier")? {
            p.customer_cap_multiplier = n;
        }
        if let Some(n) = positive_int_at(config_json, "/settlement/caps/sale_multiplier")? {
            p.sale_cap_multiplier = n;
        }

        if let Some(m) = money_at(config_json, "/settlement/promotion/revenue_threshold")? {
            p.promotion.revenue_threshold = m;
        }
        if let Some(n) = positive_int_at(config_json, "/settlement/promotion/min_children")? {
            p.promotion.min_children = n as usize;
        }
        if let Some(n) = positive_int_at(config_json, "/settlement/promotion/cap_multiplier")? {
            p.promotion.cap_multiplier = n;
        }
        if let Some(n) = positive_int_at(config_json, "/settlement/promotion/refresh_multiplier")? {
            p.promotion.refresh_multiplier = n;
        }

        if let Some(v) = config_json.pointer("/settlement/business_utc_offset_hours") {
            let h = v
                .as_i64()
                .filter(|h| (-12..=14).contains(h))
                .context("CONFIG_INVALID /settlement/business_utc_offset_hours: expected -12..=14")?;
            p.business_utc_offset_hours = h as i32;
        }

        Ok(p)
    }

    /// `reference_value × pool_rate`.
    pub fn gratitude_pool(&self) -> Money {
        self.gratitude.reference_value.mul_rate(self.gratitude.pool_rate)
    }

    pub fn customer_cap(&self, value: Money) -> Result<Money> {
        value
            .checked_mul_int(self.customer_cap_multiplier)
            .with_context(|| format!("customer cap overflow for value {value}"))
    }

    pub fn sale_cap(&self, value: Money) -> Result<Money> {
        value
            .checked_mul_int(self.sale_cap_multiplier)
            .with_context(|| format!("sale cap overflow for value {value}"))
    }

    /// Calendar date of `now` in the business timezone.
    pub fn business_date(&self, now: DateTime<Utc>) -> Result<NaiveDate> {
        let offset = FixedOffset::east_opt(self.business_utc_offset_hours * 3600)
            .context("business utc offset out of range")?;
        Ok(now.with_timezone(&offset).date_naive())
    }
}

fn tier_key(rank: Rank) -> &'static str {
    match rank {
        Rank::V1 => "V1",
        Rank::V2 => "V2",
        Rank::V3 => "V3",
        Rank::V4 => "V4",
        Rank::V5 => "V5",
        Rank::None => "None",
        Rank::V => "V",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn defaults_match_published_rates() {
        let p = SettlementPolicy::default();
        assert_eq!(p.gratitude_pool(), Money::from_units(241_500));
        assert_eq!(
            p.gratitude_pool().split_even(p.gratitude.max_levels as usize),
            Some(Money::from_units(11_500))
        );
        let total_rank_pool: u32 = p.rank_pool_rates.iter().map(|(_, r)| r.bps()).sum();
        assert_eq!(total_rank_pool, 4_800);
    }

    #[test]
    fn empty_config_yields_defaults() {
        let p = SettlementPolicy::from_config_json(&serde_json::json!({})).unwrap();
        assert_eq!(p, SettlementPolicy::default());
    }

    #[test]
    fn overrides_apply_per_key() {
        let cfg = serde_json::json!({
            "settlement": {
                "customer_pool_pct": 12,
                "gratitude": { "max_levels": 3, "reference_value": "1000", "house_member_id": 1 },
                "unilevel_pcts": [10, 5],
                "rank_pool_pcts": { "V3": 20 },
                "promotion": { "revenue_threshold": 500, "min_children": 2 }
            }
        });
        let p = SettlementPolicy::from_config_json(&cfg).unwrap();
        assert_eq!(p.customer_pool_rate, Rate::percent(12));
        assert_eq!(p.gratitude.max_levels, 3);
        assert_eq!(p.gratitude.reference_value, Money::from_units(1_000));
        assert_eq!(p.gratitude.house_member_id, 1);
        assert_eq!(p.unilevel_rates, vec![Rate::percent(10), Rate::percent(5)]);
        assert_eq!(p.rank_pool_rates[2], (Rank::V3, Rate::percent(20)));
        assert_eq!(p.rank_pool_rates[0], (Rank::V1, Rate::percent(6)));
        assert_eq!(p.promotion.revenue_threshold, Money::from_units(500));
        assert_eq!(p.promotion.min_children, 2);
    }

    #[test]
    fn per_tier_rank_pool_rates_need_not_increase() {
        let cfg = serde_json::json!({
            "settlement": {
                "rank_pool_pcts": { "V1": 6, "V2": 3, "V3": 2, "V4": 1, "V5": 1 }
            }
        });
        let p = SettlementPolicy::from_config_json(&cfg).unwrap();
        let pcts: Vec<(Rank, Rate)> = p.rank_pool_rates.clone();
        assert_eq!(
            pcts,
            vec![
                (Rank::V1, Rate::percent(6)),
                (Rank::V2, Rate::percent(3)),
                (Rank::V3, Rate::percent(2)),
                (Rank::V4, Rate::percent(1)),
                (Rank::V5, Rate::percent(1)),
            ]
        );
        let total: u32 = p.rank_pool_rates.iter().map(|(_, r)| r.bps()).sum();
        assert_eq!(total, 1_300);
    }

    #[test]
    fn malformed_values_are_rejected() {
        for cfg in [
            serde_json::json!({"settlement": {"customer_pool_pct": 150}}),
            serde_json::json!({"settlement": {"gratitude": {"max_levels": 0}}}),
            serde_json::json!({"settlement": {"unilevel_pcts": "4,5,7"}}),
            serde_json::json!({"settlement": {"gratitude": {"reference_value": "1.2.3"}}}),
            serde_json::json!({"settlement": {"business_utc_offset_hours": 30}}),
        ] {
            assert!(SettlementPolicy::from_config_json(&cfg).is_err(), "{cfg}");
        }
    }

    #[test]
    fn business_date_uses_offset() {
        let p = SettlementPolicy::default();
        // 18:30 UTC is already the next day at UTC+7.
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 18, 30, 0).unwrap();
        assert_eq!(
            p.business_date(now).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
        );
    }
}
