use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Parse error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

// ---------------------------------------------------------------------------
// Rank
// ---------------------------------------------------------------------------

/// Member rank. Declaration order is the rank order: `None < V < V1 < … < V5`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rank {
    #[default]
    None,
    V,
    V1,
    V2,
    V3,
    V4,
    V5,
}

impl Rank {
    /// Tiers that share the rank pool, in evaluation order.
    pub const POOL_TIERS: [Rank; 5] = [Rank::V1, Rank::V2, Rank::V3, Rank::V4, Rank::V5];

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Rank::None => "None",
            Rank::V => "Vip",
            Rank::V1 => "Vip1",
            Rank::V2 => "Vip2",
            Rank::V3 => "Vip3",
            Rank::V4 => "Vip4",
            Rank::V5 => "Vip5",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "None" | "" => Ok(Rank::None),
            "Vip" | "V" => Ok(Rank::V),
            "Vip1" | "V1" => Ok(Rank::V1),
            "Vip2" | "V2" => Ok(Rank::V2),
            "Vip3" | "V3" => Ok(Rank::V3),
            "Vip4" | "V4" => Ok(Rank::V4),
            "Vip5" | "V5" => Ok(Rank::V5),
            other => Err(UnknownVariant {
                kind: "rank",
                value: other.to_string(),
            }),
        }
    }

    /// V1 and above: shares the rank pool and is subject to the soft sale cap.
    #[inline]
    pub fn is_qualifying(self) -> bool {
        self >= Rank::V1
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// WalletType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WalletType {
    Source,
    CustomerShare,
    CustomerGratitude,
    Sale1,
    Sale2,
    Sale3,
}

impl WalletType {
    pub const ALL: [WalletType; 6] = [
        WalletType::Source,
        WalletType::CustomerShare,
        WalletType::CustomerGratitude,
        WalletType::Sale1,
        WalletType::Sale2,
        WalletType::Sale3,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WalletType::Source => "Source",
            WalletType::CustomerShare => "CustomerShare",
            WalletType::CustomerGratitude => "CustomerGratitude",
            WalletType::Sale1 => "Sale1",
            WalletType::Sale2 => "Sale2",
            WalletType::Sale3 => "Sale3",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        WalletType::ALL
            .into_iter()
            .find(|w| w.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "wallet type",
                value: s.to_string(),
            })
    }
}

impl fmt::Display for WalletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// CommissionBucket
// ---------------------------------------------------------------------------

/// Aggregate accumulator a bucket rolls up into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// `commission_customer`, bounded by `commission_customer_max`.
    Customer,
    /// `commission_sale`, bounded by `commission_sale_max`.
    Sale,
    /// Not capped per order.
    Uncapped,
}

/// A per-order commission accumulator column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommissionBucket {
    CustomerShare,
    CustomerGratitude,
    Sale1,
    Sale2,
    Sale3,
}

impl CommissionBucket {
    pub fn wallet_type(self) -> WalletType {
        match self {
            CommissionBucket::CustomerShare => WalletType::CustomerShare,
            CommissionBucket::CustomerGratitude => WalletType::CustomerGratitude,
            CommissionBucket::Sale1 => WalletType::Sale1,
            CommissionBucket::Sale2 => WalletType::Sale2,
            CommissionBucket::Sale3 => WalletType::Sale3,
        }
    }

    pub fn aggregate(self) -> Aggregate {
        match self {
            CommissionBucket::CustomerShare => Aggregate::Customer,
            CommissionBucket::CustomerGratitude => Aggregate::Uncapped,
            CommissionBucket::Sale1 | CommissionBucket::Sale2 | CommissionBucket::Sale3 => {
                Aggregate::Sale
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Usernames
// ---------------------------------------------------------------------------

const USERNAME_PREFIX: &str = "EL";

/// Denormalized username for a member id: `EL` + id padded to three digits.
pub fn username_for(member_id: i64) -> String {
    format!("{USERNAME_PREFIX}{member_id:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_order_matches_ladder() {
        assert!(Rank::None < Rank::V);
        assert!(Rank::V < Rank::V1);
        assert!(Rank::V4 < Rank::V5);
        assert!(!Rank::V.is_qualifying());
        assert!(Rank::V1.is_qualifying());
    }

    #[test]
    fn rank_storage_strings_roundtrip() {
        for r in [Rank::None, Rank::V, Rank::V1, Rank::V2, Rank::V3, Rank::V4, Rank::V5] {
            assert_eq!(Rank::parse(r.as_str()).unwrap(), r);
        }
        assert!(Rank::parse("Gold").is_err());
    }

    #[test]
    fn wallet_type_parse_rejects_unknown() {
        assert_eq!(WalletType::parse("Sale3").unwrap(), WalletType::Sale3);
        let err = WalletType::parse("Sale4").unwrap_err();
        assert_eq!(err.to_string(), "unknown wallet type 'Sale4'");
    }

    #[test]
    fn username_padding() {
        assert_eq!(username_for(7), "EL007");
        assert_eq!(username_for(1234), "EL1234");
    }
}
