//! Scenario: settlement over a corrupted, cyclic referral chain.
//!
//! # Invariants under test
//! - The ancestry walk stops at the first repeated member, so gratitude and
//!   unilevel pay each member of the loop exactly once.
//! - The promotion walk terminates over the same loop.
//! - The sweep settles the order and ledger invariants hold.

use mls_db::DetailRule;
use mls_ledger::{Rank, WalletType};
use mls_settlement::{run_settlement_sweep, SettlementPolicy};
use mls_testkit::{at, units, MemStore};

const HOUSE: i64 = 8080;

/// 2 -> 3 -> 4 -> 2, each with a settled order; buyer 5 is referred by 2.
fn looped_chain() -> (MemStore, i64) {
    let store = MemStore::new();
    store.add_member(HOUSE, None, Rank::None);
    store.add_product(1, "combo", units(1_000_000));
    for id in 2..=4 {
        store.add_member(id, None, Rank::None);
        store.add_settled_order(id, 1, units(1_000_000), at(id));
    }
    store.set_parent(2, Some(3));
    store.set_parent(3, Some(4));
    store.set_parent(4, Some(2));
    store.add_member(5, Some(2), Rank::None);
    let buy = store.add_completed_order(5, 1, units(1_000_000), at(10));
    (store, buy)
}

fn credits(store: &MemStore, order_id: i64, member_id: i64, rule: DetailRule) -> usize {
    store
        .order_details()
        .iter()
        .filter(|d| d.order_id == order_id && d.member_id == member_id && d.rule == rule)
        .count()
}

#[tokio::test]
async fn loop_members_are_paid_once() -> anyhow::Result<()> {
    let (store, buy) = looped_chain();

    let report = run_settlement_sweep(&store, &SettlementPolicy::default(), at(20)).await?;
    assert!(report.halted.is_none(), "{:?}", report.halted);
    assert_eq!(report.settled.len(), 1);
    assert!(store.order(buy).is_some_and(|o| o.settled));

    for id in 2..=4 {
        assert_eq!(credits(&store, buy, id, DetailRule::Gratitude), 1, "member {id}");
        assert_eq!(credits(&store, buy, id, DetailRule::Unilevel), 1, "member {id}");
        assert_eq!(
            store.available(id, WalletType::CustomerGratitude),
            units(11_500)
        );
    }
    // Levels 1..3 are 2, 3, 4 in walk order.
    assert_eq!(store.available(2, WalletType::Sale1), units(40_000));
    assert_eq!(store.available(3, WalletType::Sale1), units(50_000));
    assert_eq!(store.available(4, WalletType::Sale1), units(70_000));
    // Three levels visited out of 21.
    assert_eq!(
        store.available(HOUSE, WalletType::CustomerGratitude),
        units(207_000)
    );
    store.check_invariants()?;
    Ok(())
}

#[tokio::test]
async fn promotion_walk_terminates_on_loop() -> anyhow::Result<()> {
    let (store, _) = looped_chain();
    let mut policy = SettlementPolicy::default();
    policy.promotion.revenue_threshold = units(1);

    let report = run_settlement_sweep(&store, &policy, at(20)).await?;
    assert!(report.halted.is_none(), "{:?}", report.halted);
    assert!(report.settled[0].rank_changes.is_empty());
    for id in 2..=5 {
        assert_eq!(store.member(id).map(|m| m.rank), Some(Rank::None));
    }
    store.check_invariants()?;
    Ok(())
}
