//! Order Manager: single-listing and cart (multi-seller) order creation,
//! reservation of listing inventory, cancellation, expiration, and queries.
//!
//! Payment ingestion itself (moving `pending_paid_evr`/`confirmed_paid_evr`
//! and the `pending -> confirming -> paid` transitions) is driven by the
//! `ledger` crate as it observes deposits to an order's `payment_address`;
//! this crate owns everything that happens before and after that window.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use database::{cart_orders, listing_balances, listing_prices, listings, orders};
use domain::{
    error::{DomainError, DomainResult},
    ids::{CartOrderId, ListingId, OrderId},
    money::{Money, NATIVE_ASSET},
    order::{CartItemRequest, CartOrder, CartOrderItem, Order, OrderItem, OrderItemRequest},
    status::{ListingStatus, OrderStatus},
};
use node_rpc::NodeRpcClient;

#[derive(Clone)]
pub struct OrderManager {
    pool: PgPool,
    rpc: NodeRpcClient,
    fee_percent: BigDecimal,
    order_expiration: Duration,
}

impl OrderManager {
    pub fn new(pool: PgPool, rpc: NodeRpcClient, fee_percent: BigDecimal, order_expiration: Duration) -> Self {
        Self {
            pool,
            rpc,
            fee_percent,
            order_expiration,
        }
    }

    /// Single-listing order creation. Validates the listing is active, the
    /// requested amount of each asset has sufficient `confirmed_balance`,
    /// computes price and fee, reserves inventory, and mints a payment
    /// address — all in one transaction once the address is in hand.
    pub async fn create_order(
        &self,
        listing_id: ListingId,
        buyer_address: &str,
        items: &[OrderItemRequest],
    ) -> DomainResult<(Order, Vec<OrderItem>)> {
        if items.is_empty() {
            return Err(DomainError::Validation("an order requires at least one item".to_string()));
        }

        let mut conn = self.pool.acquire().await?;
        let listing_row = listings::get(&mut conn, listing_id)
            .await?
            .ok_or_else(|| not_found_listing(listing_id))?;
        if listing_row.status != ListingStatus::Active.as_str() {
            return Err(DomainError::Validation(format!(
                "listing {listing_id} is not active"
            )));
        }

        let mut priced = Vec::with_capacity(items.len());
        for item in items {
            let price_evr = self.price_item(&mut conn, listing_id, item).await?;
            priced.push((item.clone(), price_evr));
        }
        drop(conn);

        let total_price_evr: Money = priced.iter().map(|(_, price)| price.clone()).sum();
        let fee_evr = total_price_evr.percent_of(&self.fee_percent);
        let total_payment_evr = &total_price_evr + &fee_evr;
        let item_fees = allocate_fees(priced.iter().map(|(_, price)| price), &fee_evr, &self.fee_percent);

        let payment_address = self.rpc.getnewaddress().await?;

        let order = Order {
            id: OrderId::new(),
            listing_id,
            buyer_address: buyer_address.to_string(),
            payment_address,
            status: OrderStatus::Pending,
            total_price_evr,
            fee_evr,
            total_payment_evr,
            pending_paid_evr: Money::zero(),
            confirmed_paid_evr: Money::zero(),
            expires_at: Utc::now() + self.order_expiration,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let mut tx = self.pool.begin().await?;
        orders::insert(&mut tx, &order).await?;
        let mut order_items = Vec::with_capacity(priced.len());
        for ((request, price_evr), fee_evr) in priced.into_iter().zip(item_fees) {
            let reserved = listing_balances::reserve(&mut tx, listing_id, &request.asset_name, &request.amount)
                .await?;
            if reserved == 0 {
                return Err(DomainError::InsufficientBalance {
                    asset: request.asset_name,
                    available: Money::zero(),
                    requested: request.amount,
                });
            }
            let item = OrderItem {
                order_id: order.id,
                asset_name: request.asset_name,
                amount: request.amount,
                price_evr,
                fee_evr,
                fulfillment_tx_hash: None,
                fulfillment_time: None,
            };
            orders::insert_item(&mut tx, &item).await?;
            order_items.push(item);
        }
        tx.commit().await?;

        tracing::info!(order_id = %order.id, %listing_id, %buyer_address, "created order");
        Ok((order, order_items))
    }

    /// Cart (multi-seller) order creation: same validation and reservation
    /// loop as [`Self::create_order`], but each item may belong to a
    /// different listing/seller. Per-item price and seller are snapshotted
    /// into `cart_order_items` so payout can split proceeds later without
    /// re-reading current prices.
    pub async fn create_cart_order(
        &self,
        buyer_address: &str,
        items: &[CartItemRequest],
    ) -> DomainResult<(CartOrder, Vec<CartOrderItem>)> {
        if items.is_empty() {
            return Err(DomainError::Validation("a cart order requires at least one item".to_string()));
        }

        let mut conn = self.pool.acquire().await?;
        let mut priced = Vec::with_capacity(items.len());
        for item in items {
            let listing_row = listings::get(&mut conn, item.listing_id)
                .await?
                .ok_or_else(|| not_found_listing(item.listing_id))?;
            if listing_row.status != ListingStatus::Active.as_str() {
                return Err(DomainError::Validation(format!(
                    "listing {} is not active",
                    item.listing_id
                )));
            }
            let request = OrderItemRequest {
                asset_name: item.asset_name.clone(),
                amount: item.amount.clone(),
            };
            let price_evr = self.price_item(&mut conn, item.listing_id, &request).await?;
            priced.push((item.clone(), listing_row.seller_address, price_evr));
        }
        drop(conn);

        let total_price_evr: Money = priced.iter().map(|(_, _, price)| price.clone()).sum();
        let fee_evr = total_price_evr.percent_of(&self.fee_percent);
        let total_payment_evr = &total_price_evr + &fee_evr;
        let item_fees = allocate_fees(priced.iter().map(|(_, _, price)| price), &fee_evr, &self.fee_percent);

        let payment_address = self.rpc.getnewaddress().await?;

        let cart_order = CartOrder {
            id: CartOrderId::new(),
            buyer_address: buyer_address.to_string(),
            payment_address,
            status: OrderStatus::Pending,
            total_price_evr,
            fee_evr,
            total_payment_evr,
            pending_paid_evr: Money::zero(),
            confirmed_paid_evr: Money::zero(),
            expires_at: Utc::now() + self.order_expiration,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let mut tx = self.pool.begin().await?;
        cart_orders::insert(&mut tx, &cart_order).await?;
        let mut cart_items = Vec::with_capacity(priced.len());
        for ((request, seller_address, price_evr), fee_evr) in priced.into_iter().zip(item_fees) {
            let reserved = listing_balances::reserve(&mut tx, request.listing_id, &request.asset_name, &request.amount)
                .await?;
            if reserved == 0 {
                return Err(DomainError::InsufficientBalance {
                    asset: request.asset_name,
                    available: Money::zero(),
                    requested: request.amount,
                });
            }
            let item = CartOrderItem {
                cart_order_id: cart_order.id,
                listing_id: request.listing_id,
                asset_name: request.asset_name,
                amount: request.amount,
                price_evr,
                fee_evr,
                seller_address,
                fulfillment_tx_hash: None,
                fulfillment_time: None,
            };
            cart_orders::insert_item(&mut tx, &item).await?;
            cart_items.push(item);
        }
        tx.commit().await?;

        tracing::info!(cart_order_id = %cart_order.id, %buyer_address, "created cart order");
        Ok((cart_order, cart_items))
    }

    /// Reads the requested asset's EVR price and confirmed balance,
    /// returning `price_evr_for_amount`. Fees are never computed per item:
    /// the order-level `fee_evr` is `round_half_even(total_price_evr *
    /// fee_percent, 8)`, taken once on the summed total (see
    /// [`allocate_fees`]), never as a sum of independently rounded
    /// per-item fees. Assets priced only in another asset (no `price_evr`)
    /// cannot be bought through this path since the order's payment leg is
    /// always native-coin.
    async fn price_item(
        &self,
        conn: &mut sqlx::PgConnection,
        listing_id: ListingId,
        item: &OrderItemRequest,
    ) -> DomainResult<Money> {
        let price_row = listing_prices::get(conn, listing_id, &item.asset_name)
            .await?
            .ok_or_else(|| DomainError::Validation(format!("{} is not priced on this listing", item.asset_name)))?;
        let price_evr = price_row.price_evr.ok_or_else(|| {
            DomainError::Validation(format!(
                "{} has no native-coin price and cannot be purchased directly",
                item.asset_name
            ))
        })?;

        let balance_row = listing_balances::get(conn, listing_id, &item.asset_name)
            .await?
            .ok_or_else(|| DomainError::InsufficientBalance {
                asset: item.asset_name.clone(),
                available: Money::zero(),
                requested: item.amount.clone(),
            })?;
        let confirmed = Money::from(balance_row.confirmed_balance);
        if confirmed < item.amount {
            return Err(DomainError::InsufficientBalance {
                asset: item.asset_name.clone(),
                available: confirmed,
                requested: item.amount.clone(),
            });
        }

        Ok(Money::truncate(price_evr * item.amount.as_bigdecimal()))
    }

    pub async fn get_order(&self, id: OrderId) -> DomainResult<(Order, Vec<OrderItem>)> {
        let mut conn = self.pool.acquire().await?;
        let row = orders::get(&mut conn, id).await?.ok_or_else(|| not_found_order(id))?;
        let order = Order::try_from(row).map_err(|e| DomainError::DatabaseQuery(e.to_string()))?;
        let items = orders::items_for_order(&mut conn, id)
            .await?
            .into_iter()
            .map(OrderItem::from)
            .collect();
        Ok((order, items))
    }

    pub async fn get_cart_order(&self, id: CartOrderId) -> DomainResult<(CartOrder, Vec<CartOrderItem>)> {
        let mut conn = self.pool.acquire().await?;
        let row = cart_orders::get(&mut conn, id)
            .await?
            .ok_or_else(|| not_found_cart_order(id))?;
        let cart_order = CartOrder::try_from(row).map_err(|e| DomainError::DatabaseQuery(e.to_string()))?;
        let items = cart_orders::items_for_order(&mut conn, id)
            .await?
            .into_iter()
            .map(CartOrderItem::from)
            .collect();
        Ok((cart_order, items))
    }

    /// Payment-address balances grouped by asset. An order's payment
    /// address only ever receives the native coin, so this is always a
    /// single `(NATIVE_ASSET, confirmed, pending)` triple read off the
    /// order row's own running totals rather than a fresh ledger query.
    pub async fn get_order_balances(&self, id: OrderId) -> DomainResult<Vec<(String, Money, Money)>> {
        let (order, _) = self.get_order(id).await?;
        Ok(vec![(
            NATIVE_ASSET.to_string(),
            order.confirmed_paid_evr,
            order.pending_paid_evr,
        )])
    }

    pub async fn search_orders(&self, criteria: orders::SearchCriteria) -> DomainResult<Vec<Order>> {
        let mut conn = self.pool.acquire().await?;
        let rows = orders::search(&mut conn, &criteria).await?;
        rows.into_iter()
            .map(|row| Order::try_from(row).map_err(|e| DomainError::DatabaseQuery(e.to_string())))
            .collect()
    }

    /// Cancels an order still in `pending`/`confirming`, releasing every
    /// item's reserved amount back to `confirmed_balance` atomically with
    /// the status transition.
    pub async fn cancel_order(&self, id: OrderId) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;
        let row = orders::get(&mut tx, id).await?.ok_or_else(|| not_found_order(id))?;
        let order = Order::try_from(row).map_err(|e| DomainError::DatabaseQuery(e.to_string()))?;
        if !order.status.is_cancellable() {
            return Err(DomainError::InvalidStateTransition {
                from: order.status.to_string(),
                to: OrderStatus::Cancelled.to_string(),
            });
        }
        let items = orders::items_for_order(&mut tx, id).await?;
        for item in &items {
            listing_balances::release(&mut tx, order.listing_id, &item.asset_name, &Money::from(item.amount.clone()))
                .await?;
        }
        let affected = orders::transition_status(
            &mut tx,
            id,
            &[OrderStatus::Pending, OrderStatus::Confirming],
            OrderStatus::Cancelled,
        )
        .await?;
        if affected == 0 {
            return Err(DomainError::InvalidStateTransition {
                from: order.status.to_string(),
                to: OrderStatus::Cancelled.to_string(),
            });
        }
        tx.commit().await?;
        tracing::info!(order_id = %id, "order cancelled, reservation released");
        Ok(())
    }

    pub async fn cancel_cart_order(&self, id: CartOrderId) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;
        let row = cart_orders::get(&mut tx, id)
            .await?
            .ok_or_else(|| not_found_cart_order(id))?;
        let cart_order = CartOrder::try_from(row).map_err(|e| DomainError::DatabaseQuery(e.to_string()))?;
        if !cart_order.status.is_cancellable() {
            return Err(DomainError::InvalidStateTransition {
                from: cart_order.status.to_string(),
                to: OrderStatus::Cancelled.to_string(),
            });
        }
        let items = cart_orders::items_for_order(&mut tx, id).await?;
        for item in &items {
            listing_balances::release(
                &mut tx,
                ListingId::from(item.listing_id),
                &item.asset_name,
                &Money::from(item.amount.clone()),
            )
            .await?;
        }
        let affected = cart_orders::transition_status(
            &mut tx,
            id,
            &[OrderStatus::Pending, OrderStatus::Confirming],
            OrderStatus::Cancelled,
        )
        .await?;
        if affected == 0 {
            return Err(DomainError::InvalidStateTransition {
                from: cart_order.status.to_string(),
                to: OrderStatus::Cancelled.to_string(),
            });
        }
        tx.commit().await?;
        tracing::info!(cart_order_id = %id, "cart order cancelled, reservation released");
        Ok(())
    }

    /// Transitions every order/cart-order past `expires_at` with no pending
    /// payment to `expired`, releasing reserved inventory. Driven by the
    /// `workers` crate's periodic sweeper; returns the number reaped.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> DomainResult<usize> {
        let mut reaped = 0;

        let mut conn = self.pool.acquire().await?;
        let due = orders::expirable(&mut conn, now).await?;
        drop(conn);
        for row in due {
            let id = OrderId::from(row.id);
            if let Err(err) = self.expire_one_order(id).await {
                tracing::warn!(order_id = %id, ?err, "failed to expire order, will retry next sweep");
                continue;
            }
            reaped += 1;
        }

        let mut conn = self.pool.acquire().await?;
        let due_carts = cart_orders::expirable(&mut conn, now).await?;
        drop(conn);
        for row in due_carts {
            let id = CartOrderId::from(row.id);
            if let Err(err) = self.expire_one_cart_order(id).await {
                tracing::warn!(cart_order_id = %id, ?err, "failed to expire cart order, will retry next sweep");
                continue;
            }
            reaped += 1;
        }

        Ok(reaped)
    }

    async fn expire_one_order(&self, id: OrderId) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;
        let row = orders::get(&mut tx, id).await?.ok_or_else(|| not_found_order(id))?;
        let order = Order::try_from(row).map_err(|e| DomainError::DatabaseQuery(e.to_string()))?;
        let items = orders::items_for_order(&mut tx, id).await?;
        for item in &items {
            listing_balances::release(&mut tx, order.listing_id, &item.asset_name, &Money::from(item.amount.clone()))
                .await?;
        }
        orders::transition_status(
            &mut tx,
            id,
            &[OrderStatus::Pending, OrderStatus::Confirming],
            OrderStatus::Expired,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn expire_one_cart_order(&self, id: CartOrderId) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;
        let items = cart_orders::items_for_order(&mut tx, id).await?;
        for item in &items {
            listing_balances::release(
                &mut tx,
                ListingId::from(item.listing_id),
                &item.asset_name,
                &Money::from(item.amount.clone()),
            )
            .await?;
        }
        cart_orders::transition_status(
            &mut tx,
            id,
            &[OrderStatus::Pending, OrderStatus::Confirming],
            OrderStatus::Expired,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Allocates an order-level fee (already rounded once on the order total)
/// across its items proportionally to each item's own price, so
/// `OrderItem`/`CartOrderItem` rows carry a per-item fee without ever
/// re-deriving the fee independently per item. Every item but the last gets
/// its natural `round_half_even` share; the last absorbs whatever residual
/// rounding difference remains, so the allocation always sums to exactly
/// `total_fee`.
fn allocate_fees<'a>(
    prices: impl ExactSizeIterator<Item = &'a Money>,
    total_fee: &Money,
    fee_percent: &BigDecimal,
) -> Vec<Money> {
    let n = prices.len();
    if n == 0 {
        return Vec::new();
    }
    let mut fees: Vec<Money> = prices.map(|price| price.percent_of(fee_percent)).collect();
    let provisional_sum: Money = fees.iter().cloned().sum();
    let last = fees.last_mut().expect("n > 0");
    *last = &*last + &(total_fee - &provisional_sum);
    fees
}

fn not_found_listing(id: ListingId) -> DomainError {
    DomainError::NotFound {
        entity: "listing",
        id: id.to_string(),
    }
}

fn not_found_order(id: OrderId) -> DomainError {
    DomainError::NotFound {
        entity: "order",
        id: id.to_string(),
    }
}

fn not_found_cart_order(id: CartOrderId) -> DomainError {
    DomainError::NotFound {
        entity: "cart_order",
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn fee_is_computed_once_on_total_and_matches_sum_of_per_item_fees() {
        // S2: L1(CRONOS@75) x1.5, L2(ASTRA@100) x2, fee_percent = 1%.
        let fee_percent = BigDecimal::from_str("0.01").unwrap();
        let item1_price = Money::truncate(BigDecimal::from_str("75").unwrap() * BigDecimal::from_str("1.5").unwrap());
        let item2_price = Money::truncate(BigDecimal::from_str("100").unwrap() * BigDecimal::from_str("2").unwrap());
        assert_eq!(item1_price.to_string(), "112.50000000");
        assert_eq!(item2_price.to_string(), "200.00000000");

        let total_price = item1_price.clone() + item2_price.clone();
        let total_fee = total_price.percent_of(&fee_percent);
        let item_fees = allocate_fees([&item1_price, &item2_price].into_iter(), &total_fee, &fee_percent);

        assert_eq!(total_price.to_string(), "312.50000000");
        assert_eq!(total_fee.to_string(), "3.12500000");
        let allocated_sum: Money = item_fees.iter().cloned().sum();
        assert_eq!(allocated_sum, total_fee);
    }

    #[test]
    fn fee_is_rounded_once_on_the_total_not_summed_from_per_item_roundings() {
        // Two items whose individually-rounded per-item fees would sum to
        // one satoshi less than the correct total-based fee.
        let fee_percent = BigDecimal::from_str("0.01").unwrap();
        let item1_price = Money::from_str("0.33333333").unwrap();
        let item2_price = Money::from_str("0.33333334").unwrap();

        let wrong_sum_of_per_item_fees = item1_price.percent_of(&fee_percent) + item2_price.percent_of(&fee_percent);
        assert_eq!(wrong_sum_of_per_item_fees.to_string(), "0.00666666");

        let total_price = item1_price.clone() + item2_price.clone();
        let correct_fee = total_price.percent_of(&fee_percent);
        assert_eq!(correct_fee.to_string(), "0.00666667");
        assert_ne!(correct_fee, wrong_sum_of_per_item_fees);

        let item_fees = allocate_fees([&item1_price, &item2_price].into_iter(), &correct_fee, &fee_percent);
        let allocated_sum: Money = item_fees.iter().cloned().sum();
        assert_eq!(allocated_sum, correct_fee);
    }

    #[test]
    fn single_item_happy_path_matches_s1() {
        // S1: CRONOS@50 EVR, buy 1 -> total=50, fee=0.5, payment=50.5.
        let fee_percent = BigDecimal::from_str("0.01").unwrap();
        let price = Money::truncate(BigDecimal::from_str("50").unwrap() * BigDecimal::from_str("1").unwrap());
        let fee = price.percent_of(&fee_percent);
        let total_payment = &price + &fee;
        assert_eq!(price.to_string(), "50.00000000");
        assert_eq!(fee.to_string(), "0.50000000");
        assert_eq!(total_payment.to_string(), "50.50000000");
    }
}
