//! Scenario: gratitude cascade.
//!
//! # Invariants under test
//! - Every referral ancestor up to the level ceiling receives the fixed
//!   per-level amount, with or without a settled order of their own.
//! - Levels beyond the chain's depth are paid to the house member.
//! - A missing house member halts the sweep at the gratitude stage and
//!   leaves nothing written.

use mls_db::DetailRule;
use mls_ledger::{Rank, WalletType};
use mls_settlement::{run_settlement_sweep, SettleStage, SettlementPolicy};
use mls_testkit::{at, units, MemStore};

const HOUSE: i64 = 8080;

/// 1 <- 2 <- 3 <- 4, with settled orders for 1 and 2 only.
fn chain(store: &MemStore) -> (i64, i64, i64) {
    store.add_product(1, "combo", units(1_000_000));
    store.add_member(1, None, Rank::None);
    store.add_member(2, Some(1), Rank::None);
    store.add_member(3, Some(2), Rank::None);
    store.add_member(4, Some(3), Rank::None);
    let o1 = store.add_settled_order(1, 1, units(1_000_000), at(1));
    let o2 = store.add_settled_order(2, 1, units(1_000_000), at(2));
    let o4 = store.add_completed_order(4, 1, units(1_000_000), at(3));
    (o1, o2, o4)
}

#[tokio::test]
async fn ancestors_get_fixed_share_and_house_gets_the_rest() -> anyhow::Result<()> {
    let store = MemStore::new();
    store.add_member(HOUSE, None, Rank::None);
    let (o1, o2, o4) = chain(&store);

    let report = run_settlement_sweep(&store, &SettlementPolicy::default(), at(10)).await?;
    assert!(report.halted.is_none(), "{:?}", report.halted);

    for member in [1, 2, 3] {
        assert_eq!(
            store.available(member, WalletType::CustomerGratitude),
            units(11_500),
            "member {member}"
        );
    }
    // 241,500 - 3 x 11,500
    assert_eq!(
        store.available(HOUSE, WalletType::CustomerGratitude),
        units(207_000)
    );

    assert_eq!(
        store.order(o1).unwrap().commission_customer_gratitude,
        units(11_500)
    );
    assert_eq!(
        store.order(o2).unwrap().commission_customer_gratitude,
        units(11_500)
    );
    // Gratitude never touches the capped customer aggregate.
    assert_eq!(store.order(o1).unwrap().commission_customer, units(0));

    let details = store.order_details();
    let levels = details
        .iter()
        .filter(|d| d.rule == DetailRule::Gratitude && d.order_id == o4)
        .count();
    let house = details
        .iter()
        .filter(|d| d.rule == DetailRule::GratitudeHouse && d.member_id == HOUSE)
        .count();
    assert_eq!((levels, house), (3, 1));
    store.check_invariants()?;
    Ok(())
}

#[tokio::test]
async fn level_ceiling_stops_the_cascade() -> anyhow::Result<()> {
    let store = MemStore::new();
    store.add_member(HOUSE, None, Rank::None);
    chain(&store);

    let mut policy = SettlementPolicy::default();
    policy.gratitude.max_levels = 2;

    let report = run_settlement_sweep(&store, &policy, at(10)).await?;
    assert!(report.halted.is_none());

    assert_eq!(
        store.available(3, WalletType::CustomerGratitude),
        units(120_750)
    );
    assert_eq!(
        store.available(2, WalletType::CustomerGratitude),
        units(120_750)
    );
    assert_eq!(store.available(1, WalletType::CustomerGratitude), units(0));
    // Both levels visited: nothing left for the house.
    assert!(store.wallet(HOUSE, WalletType::CustomerGratitude).is_none());
    Ok(())
}

#[tokio::test]
async fn missing_house_member_halts_without_writes() -> anyhow::Result<()> {
    let store = MemStore::new();
    let (_, _, o4) = chain(&store);

    let report = run_settlement_sweep(&store, &SettlementPolicy::default(), at(10)).await?;
    assert!(report.settled.is_empty());
    let halt = report.halted.expect("sweep must halt");
    assert_eq!(halt.order_id, o4);
    assert_eq!(halt.stage, SettleStage::Gratitude);
    assert!(halt.error.contains("8080"), "{}", halt.error);

    assert_eq!(store.write_count(), 0);
    assert!(store.placements().is_empty());
    assert!(store.order(o4).is_some_and(|o| !o.settled));
    Ok(())
}
