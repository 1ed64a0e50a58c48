use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use mls_ledger::{CommissionBucket, Money, Rank, WalletType};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::rows::{
    MemberRow, NewOrder, NewOrderDetail, NewOrderPay, NewWalletDetail, OrderRow, PlacementRow,
    ProductRow, WalletRow,
};
use crate::store::{LedgerStore, LedgerTx};

const ORDER_COLUMNS: &str = r#"
    id, member_id, product_id, value, paid, pending, settled, created_at, completed_at,
    commission_customer, commission_customer_max,
    commission_customer_share, commission_customer_gratitude,
    commission_sale, commission_sale_max,
    commission_sale1, commission_sale2, commission_sale3
"#;

const MEMBER_COLUMNS: &str = "id, parent_id, username, rank";

const WALLET_COLUMNS: &str = "id, member_id, wallet_type, available, total";

/// Postgres-backed [`LedgerStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait::async_trait]
impl LedgerStore for PgStore {
    type Tx = PgLedgerTx;

    async fn begin(&self) -> Result<PgLedgerTx> {
        let mut tx = self.pool.begin().await.context("begin failed")?;
        sqlx::query("set transaction isolation level read committed")
            .execute(&mut *tx)
            .await
            .context("set isolation level failed")?;
        Ok(PgLedgerTx { tx })
    }

    async fn list_sweep_candidates(&self) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            r#"
            select id
            from orders
            where completed_at is not null
              and settled = false
            order by completed_at asc, id asc
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("list_sweep_candidates failed")?;

        rows.iter()
            .map(|r| r.try_get::<i64, _>("id").map_err(Into::into))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn money(row: &PgRow, col: &str) -> Result<Money> {
    Ok(Money::new(row.try_get::<i64, _>(col)?))
}

fn member_from_row(row: &PgRow) -> Result<MemberRow> {
    Ok(MemberRow {
        id: row.try_get("id")?,
        parent_id: row.try_get("parent_id")?,
        username: row.try_get("username")?,
        rank: Rank::parse(&row.try_get::<String, _>("rank")?)?,
    })
}

fn order_from_row(row: &PgRow) -> Result<OrderRow> {
    Ok(OrderRow {
        id: row.try_get("id")?,
        member_id: row.try_get("member_id")?,
        product_id: row.try_get("product_id")?,
        value: money(row, "value")?,
        paid: money(row, "paid")?,
        pending: money(row, "pending")?,
        settled: row.try_get("settled")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
        commission_customer: money(row, "commission_customer")?,
        commission_customer_max: money(row, "commission_customer_max")?,
        commission_customer_share: money(row, "commission_customer_share")?,
        commission_customer_gratitude: money(row, "commission_customer_gratitude")?,
        commission_sale: money(row, "commission_sale")?,
        commission_sale_max: money(row, "commission_sale_max")?,
        commission_sale1: money(row, "commission_sale1")?,
        commission_sale2: money(row, "commission_sale2")?,
        commission_sale3: money(row, "commission_sale3")?,
    })
}

fn wallet_from_row(row: &PgRow) -> Result<WalletRow> {
    Ok(WalletRow {
        id: row.try_get("id")?,
        member_id: row.try_get("member_id")?,
        wallet_type: WalletType::parse(&row.try_get::<String, _>("wallet_type")?)?,
        available: money(row, "available")?,
        total: money(row, "total")?,
    })
}

fn placement_from_row(row: &PgRow) -> Result<PlacementRow> {
    Ok(PlacementRow {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        member_id: row.try_get("member_id")?,
        parent_id: row.try_get("parent_id")?,
    })
}

/// Bucket column plus the aggregate it rolls into (if capped).
fn bucket_columns(bucket: CommissionBucket) -> (&'static str, Option<(&'static str, &'static str)>) {
    match bucket {
        CommissionBucket::CustomerShare => (
            "commission_customer_share",
            Some(("commission_customer", "commission_customer_max")),
        ),
        CommissionBucket::CustomerGratitude => ("commission_customer_gratitude", None),
        CommissionBucket::Sale1 => (
            "commission_sale1",
            Some(("commission_sale", "commission_sale_max")),
        ),
        CommissionBucket::Sale2 => (
            "commission_sale2",
            Some(("commission_sale", "commission_sale_max")),
        ),
        CommissionBucket::Sale3 => (
            "commission_sale3",
            Some(("commission_sale", "commission_sale_max")),
        ),
    }
}

fn ranks_at_least(rank: Rank) -> Vec<String> {
    [
        Rank::None,
        Rank::V,
        Rank::V1,
        Rank::V2,
        Rank::V3,
        Rank::V4,
        Rank::V5,
    ]
    .into_iter()
    .filter(|r| *r >= rank)
    .map(|r| r.as_str().to_string())
    .collect()
}

#[async_trait::async_trait]
impl LedgerTx for PgLedgerTx {
    async fn commit(self) -> Result<()> {
        self.tx.commit().await.context("commit failed")
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.context("rollback failed")
    }

    async fn fetch_member(&mut self, member_id: i64) -> Result<Option<MemberRow>> {
        let row = sqlx::query(&format!(
            "select {MEMBER_COLUMNS} from members where id = $1"
        ))
        .bind(member_id)
        .fetch_optional(&mut *self.tx)
        .await
        .context("fetch_member failed")?;
        row.as_ref().map(member_from_row).transpose()
    }

    async fn fetch_member_by_username(&mut self, username: &str) -> Result<Option<MemberRow>> {
        let row = sqlx::query(&format!(
            "select {MEMBER_COLUMNS} from members where username = $1"
        ))
        .bind(username)
        .fetch_optional(&mut *self.tx)
        .await
        .context("fetch_member_by_username failed")?;
        row.as_ref().map(member_from_row).transpose()
    }

    async fn fetch_members(&mut self, ids: &[i64]) -> Result<Vec<MemberRow>> {
        let rows = sqlx::query(&format!(
            "select {MEMBER_COLUMNS} from members where id = any($1) order by id"
        ))
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await
        .context("fetch_members failed")?;
        rows.iter().map(member_from_row).collect()
    }

    async fn list_children(&mut self, parent_id: i64) -> Result<Vec<MemberRow>> {
        let rows = sqlx::query(&format!(
            "select {MEMBER_COLUMNS} from members where parent_id = $1 order by id"
        ))
        .bind(parent_id)
        .fetch_all(&mut *self.tx)
        .await
        .context("list_children failed")?;
        rows.iter().map(member_from_row).collect()
    }

    async fn list_members_with_rank_at_least(&mut self, rank: Rank) -> Result<Vec<MemberRow>> {
        let rows = sqlx::query(&format!(
            "select {MEMBER_COLUMNS} from members where rank = any($1) order by id"
        ))
        .bind(ranks_at_least(rank))
        .fetch_all(&mut *self.tx)
        .await
        .context("list_members_with_rank_at_least failed")?;
        rows.iter().map(member_from_row).collect()
    }

    async fn update_member_rank(&mut self, member_id: i64, rank: Rank) -> Result<()> {
        let res = sqlx::query("update members set rank = $2 where id = $1")
            .bind(member_id)
            .bind(rank.as_str())
            .execute(&mut *self.tx)
            .await
            .context("update_member_rank failed")?;
        if res.rows_affected() != 1 {
            bail!("update_member_rank: member {member_id} not found");
        }
        Ok(())
    }

    async fn descendant_ids(&mut self, root: i64) -> Result<Vec<i64>> {
        // `path` carries the ancestry of each row; a member already on its
        // own path is not expanded again.
        let rows = sqlx::query(
            r#"
            with recursive tree(id, path) as (
                select m.id, array[m.id]
                from members m
                where m.id = $1
              union all
                select c.id, t.path || c.id
                from members c
                join tree t on c.parent_id = t.id
                where not (c.id = any(t.path))
            )
            select distinct id from tree order by id
            "#,
        )
        .bind(root)
        .fetch_all(&mut *self.tx)
        .await
        .context("descendant_ids failed")?;
        rows.iter()
            .map(|r| r.try_get::<i64, _>("id").map_err(Into::into))
            .collect()
    }

    async fn fetch_order(&mut self, order_id: i64) -> Result<Option<OrderRow>> {
        let row = sqlx::query(&format!("select {ORDER_COLUMNS} from orders where id = $1"))
            .bind(order_id)
            .fetch_optional(&mut *self.tx)
            .await
            .context("fetch_order failed")?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn list_customer_pool_orders(&mut self) -> Result<Vec<OrderRow>> {
        let rows = sqlx::query(&format!(
            r#"
            select {ORDER_COLUMNS}
            from orders
            where settled = true
              and commission_customer < commission_customer_max
            order by id asc
            "#
        ))
        .fetch_all(&mut *self.tx)
        .await
        .context("list_customer_pool_orders failed")?;
        rows.iter().map(order_from_row).collect()
    }

    async fn latest_order_for_member(
        &mut self,
        member_id: i64,
        settled_only: bool,
    ) -> Result<Option<OrderRow>> {
        let row = sqlx::query(&format!(
            r#"
            select {ORDER_COLUMNS}
            from orders
            where member_id = $1
              and completed_at is not null
              and ($2 = false or settled = true)
            order by created_at desc, id desc
            limit 1
            "#
        ))
        .bind(member_id)
        .bind(settled_only)
        .fetch_optional(&mut *self.tx)
        .await
        .context("latest_order_for_member failed")?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn find_open_order(
        &mut self,
        member_id: i64,
        product_id: i64,
    ) -> Result<Option<OrderRow>> {
        let row = sqlx::query(&format!(
            r#"
            select {ORDER_COLUMNS}
            from orders
            where member_id = $1
              and product_id = $2
              and completed_at is null
              and pending > 0
            order by created_at desc, id desc
            limit 1
            "#
        ))
        .bind(member_id)
        .bind(product_id)
        .fetch_optional(&mut *self.tx)
        .await
        .context("find_open_order failed")?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn insert_order(&mut self, order: &NewOrder) -> Result<OrderRow> {
        let row = sqlx::query(&format!(
            r#"
            insert into orders (member_id, product_id, value, paid, pending, created_at)
            values ($1, $2, $3, $4, $3::bigint - $4::bigint, $5)
            returning {ORDER_COLUMNS}
            "#
        ))
        .bind(order.member_id)
        .bind(order.product_id)
        .bind(order.value.raw())
        .bind(order.paid.raw())
        .bind(order.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .context("insert_order failed")?;
        order_from_row(&row)
    }

    async fn apply_commission(
        &mut self,
        order_id: i64,
        bucket: CommissionBucket,
        amount: Money,
    ) -> Result<OrderRow> {
        let (col, aggregate) = bucket_columns(bucket);
        let sql = match aggregate {
            Some((agg, max)) => format!(
                r#"
                update orders
                set {col} = {col} + $2,
                    {agg} = {agg} + $2
                where id = $1
                  and $2 >= 0
                  and {agg} + $2 <= {max}
                returning {ORDER_COLUMNS}
                "#
            ),
            None => format!(
                r#"
                update orders
                set {col} = {col} + $2
                where id = $1
                  and $2 >= 0
                returning {ORDER_COLUMNS}
                "#
            ),
        };
        let row = sqlx::query(&sql)
            .bind(order_id)
            .bind(amount.raw())
            .fetch_optional(&mut *self.tx)
            .await
            .context("apply_commission failed")?;
        match row {
            Some(r) => order_from_row(&r),
            None => Err(anyhow!(
                "apply_commission guard rejected: order={order_id} bucket={bucket:?} amount={amount}"
            )),
        }
    }

    async fn set_order_sale_cap(&mut self, order_id: i64, sale_max: Money) -> Result<OrderRow> {
        let row = sqlx::query(&format!(
            r#"
            update orders
            set commission_sale_max = $2
            where id = $1
              and commission_sale <= $2
            returning {ORDER_COLUMNS}
            "#
        ))
        .bind(order_id)
        .bind(sale_max.raw())
        .fetch_optional(&mut *self.tx)
        .await
        .context("set_order_sale_cap failed")?;
        match row {
            Some(r) => order_from_row(&r),
            None => Err(anyhow!(
                "set_order_sale_cap guard rejected: order={order_id} sale_max={sale_max}"
            )),
        }
    }

    async fn apply_payment_guarded(
        &mut self,
        order_id: i64,
        amount: Money,
    ) -> Result<Option<OrderRow>> {
        let row = sqlx::query(&format!(
            r#"
            update orders
            set paid = paid + $2,
                pending = pending - $2
            where id = $1
              and completed_at is null
              and $2 > 0
              and paid + $2 <= value
              and pending - $2 >= 0
            returning {ORDER_COLUMNS}
            "#
        ))
        .bind(order_id)
        .bind(amount.raw())
        .fetch_optional(&mut *self.tx)
        .await
        .context("apply_payment_guarded failed")?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn complete_order(
        &mut self,
        order_id: i64,
        at: DateTime<Utc>,
        customer_max: Money,
        sale_max: Money,
    ) -> Result<OrderRow> {
        let row = sqlx::query(&format!(
            r#"
            update orders
            set completed_at = $2,
                commission_customer_max = $3,
                commission_sale_max = $4
            where id = $1
              and completed_at is null
              and pending = 0
            returning {ORDER_COLUMNS}
            "#
        ))
        .bind(order_id)
        .bind(at)
        .bind(customer_max.raw())
        .bind(sale_max.raw())
        .fetch_optional(&mut *self.tx)
        .await
        .context("complete_order failed")?;
        match row {
            Some(r) => order_from_row(&r),
            None => Err(anyhow!(
                "complete_order: order {order_id} is not an open, fully paid order"
            )),
        }
    }

    async fn mark_settled(&mut self, order_id: i64) -> Result<()> {
        let res = sqlx::query(
            r#"
            update orders
            set settled = true
            where id = $1
              and settled = false
              and completed_at is not null
            "#,
        )
        .bind(order_id)
        .execute(&mut *self.tx)
        .await
        .context("mark_settled failed")?;
        if res.rows_affected() != 1 {
            bail!("mark_settled: order {order_id} is not a completed, unsettled order");
        }
        Ok(())
    }

    async fn sum_paid(
        &mut self,
        member_ids: &[i64],
        completed_at_or_before: Option<DateTime<Utc>>,
    ) -> Result<Money> {
        let (total,): (i64,) = sqlx::query_as::<_, (i64,)>(
            r#"
            select least(coalesce(sum(paid), 0), 9223372036854775807)::bigint
            from orders
            where member_id = any($1)
              and ($2::timestamptz is null
                   or (completed_at is not null and completed_at <= $2))
            "#,
        )
        .bind(member_ids)
        .bind(completed_at_or_before)
        .fetch_one(&mut *self.tx)
        .await
        .context("sum_paid failed")?;
        Ok(Money::new(total))
    }

    async fn insert_order_detail(&mut self, d: &NewOrderDetail) -> Result<()> {
        sqlx::query(
            r#"
            insert into order_details (
              order_id, member_id, wallet_type, rule, value, note, created_at
            ) values (
              $1, $2, $3, $4, $5, $6, $7
            )
            "#,
        )
        .bind(d.order_id)
        .bind(d.member_id)
        .bind(d.wallet_type.as_str())
        .bind(d.rule.as_str())
        .bind(d.value.raw())
        .bind(&d.note)
        .bind(d.created_at)
        .execute(&mut *self.tx)
        .await
        .context("insert_order_detail failed")?;
        Ok(())
    }

    async fn insert_order_pay(&mut self, p: &NewOrderPay) -> Result<()> {
        sqlx::query(
            r#"
            insert into order_pays (order_id, pay_date, value, note, created_by)
            values ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(p.order_id)
        .bind(p.pay_date)
        .bind(p.value.raw())
        .bind(&p.note)
        .bind(&p.created_by)
        .execute(&mut *self.tx)
        .await
        .context("insert_order_pay failed")?;
        Ok(())
    }

    async fn insert_wallet_detail(&mut self, d: &NewWalletDetail) -> Result<()> {
        sqlx::query(
            r#"
            insert into wallet_details (wallet_id, value, note, created_at)
            values ($1, $2, $3, $4)
            "#,
        )
        .bind(d.wallet_id)
        .bind(d.value.raw())
        .bind(&d.note)
        .bind(d.created_at)
        .execute(&mut *self.tx)
        .await
        .context("insert_wallet_detail failed")?;
        Ok(())
    }

    async fn fetch_wallet(
        &mut self,
        member_id: i64,
        wallet_type: WalletType,
    ) -> Result<Option<WalletRow>> {
        let row = sqlx::query(&format!(
            "select {WALLET_COLUMNS} from wallets where member_id = $1 and wallet_type = $2"
        ))
        .bind(member_id)
        .bind(wallet_type.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .context("fetch_wallet failed")?;
        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn list_wallets(&mut self, member_id: i64) -> Result<Vec<WalletRow>> {
        let rows = sqlx::query(&format!(
            "select {WALLET_COLUMNS} from wallets where member_id = $1 order by id"
        ))
        .bind(member_id)
        .fetch_all(&mut *self.tx)
        .await
        .context("list_wallets failed")?;
        rows.iter().map(wallet_from_row).collect()
    }

    async fn upsert_wallet_credit(
        &mut self,
        member_id: i64,
        wallet_type: WalletType,
        amount: Money,
    ) -> Result<WalletRow> {
        let row = sqlx::query(&format!(
            r#"
            insert into wallets (member_id, wallet_type, available, total)
            values ($1, $2, $3, $3)
            on conflict (member_id, wallet_type) do update
            set available = wallets.available + excluded.available,
                total = wallets.total + excluded.total
            returning {WALLET_COLUMNS}
            "#
        ))
        .bind(member_id)
        .bind(wallet_type.as_str())
        .bind(amount.raw())
        .fetch_one(&mut *self.tx)
        .await
        .context("upsert_wallet_credit failed")?;
        wallet_from_row(&row)
    }

    async fn debit_wallet_guarded(
        &mut self,
        member_id: i64,
        wallet_type: WalletType,
        amount: Money,
    ) -> Result<Option<WalletRow>> {
        let row = sqlx::query(&format!(
            r#"
            update wallets
            set available = available - $3
            where member_id = $1
              and wallet_type = $2
              and $3 > 0
              and available >= $3
            returning {WALLET_COLUMNS}
            "#
        ))
        .bind(member_id)
        .bind(wallet_type.as_str())
        .bind(amount.raw())
        .fetch_optional(&mut *self.tx)
        .await
        .context("debit_wallet_guarded failed")?;
        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn count_binary_placements(&mut self) -> Result<u64> {
        let (n,): (i64,) = sqlx::query_as::<_, (i64,)>(
            "select count(*)::bigint from binary_placements",
        )
        .fetch_one(&mut *self.tx)
        .await
        .context("count_binary_placements failed")?;
        u64::try_from(n).context("negative placement count")
    }

    async fn binary_placement_at(&mut self, position: u64) -> Result<Option<PlacementRow>> {
        if position == 0 {
            return Ok(None);
        }
        let offset = i64::try_from(position - 1).context("placement position out of range")?;
        let row = sqlx::query(
            r#"
            select id, order_id, member_id, parent_id
            from binary_placements
            order by id asc
            offset $1
            limit 1
            "#,
        )
        .bind(offset)
        .fetch_optional(&mut *self.tx)
        .await
        .context("binary_placement_at failed")?;
        row.as_ref().map(placement_from_row).transpose()
    }

    async fn insert_binary_placement(
        &mut self,
        order_id: i64,
        member_id: i64,
        parent_id: Option<i64>,
    ) -> Result<PlacementRow> {
        let row = sqlx::query(
            r#"
            insert into binary_placements (order_id, member_id, parent_id)
            values ($1, $2, $3)
            returning id, order_id, member_id, parent_id
            "#,
        )
        .bind(order_id)
        .bind(member_id)
        .bind(parent_id)
        .fetch_one(&mut *self.tx)
        .await
        .context("insert_binary_placement failed")?;
        placement_from_row(&row)
    }

    async fn fetch_product(&mut self, product_id: i64) -> Result<Option<ProductRow>> {
        let row = sqlx::query("select id, name, price from products where id = $1")
            .bind(product_id)
            .fetch_optional(&mut *self.tx)
            .await
            .context("fetch_product failed")?;
        row.map(|r| -> Result<ProductRow> {
            Ok(ProductRow {
                id: r.try_get("id")?,
                name: r.try_get("name")?,
                price: money(&r, "price")?,
            })
        })
        .transpose()
    }
}
