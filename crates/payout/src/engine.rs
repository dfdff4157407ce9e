//! Payout Engine: the loop that turns a `paid` order into on-chain asset and
//! coin transfers, idempotently and in buyer-first order (the asset leg,
//! which moves custody-controlled inventory to the buyer, broadcasts before
//! the coin leg, which only ever pays out parties who can be retried safely).

use std::{sync::Arc, time::Duration};

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde_json::{json, Map, Value};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use database::{cart_orders, listings, orders, payouts, sale_history};
use domain::{
    error::{DomainError, DomainResult},
    ids::{CartOrderId, ListingId, OrderId},
    listing::Listing,
    money::Money,
    order::{CartOrder, CartOrderItem, Order, OrderItem, SaleHistory},
    status::{OrderStatus, PayoutStage},
};
use node_rpc::{types::RawTxInput, NodeRpcClient};

use crate::metrics::Metrics;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Average marginal input/output sizes (bytes) used for the raw transaction
/// fee estimate; close enough to a P2PKH spend for this workspace's purposes.
const BYTES_PER_INPUT: u64 = 148;
const BYTES_PER_OUTPUT: u64 = 34;
const BYTES_OVERHEAD: u64 = 10;

pub struct PayoutEngine {
    pool: PgPool,
    rpc: NodeRpcClient,
    fee_address: String,
    min_fee_rate_evr_per_kb: BigDecimal,
    max_payout_attempts: u32,
    payout_retry_delay: Duration,
    payout_batch_size: i64,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
}

/// One listing's worth of a payout, normalized so order and cart-order
/// processing share the same output-building logic regardless of which
/// table the item snapshot came from.
struct PayoutItem {
    listing_id: ListingId,
    asset_name: String,
    amount: Money,
    price_evr: Money,
    fee_evr: Money,
    seller_address: String,
    deposit_address: String,
}

fn estimate_network_fee(min_fee_rate_evr_per_kb: &BigDecimal, num_inputs: usize, num_outputs: usize) -> Money {
    let bytes = num_inputs as u64 * BYTES_PER_INPUT + num_outputs as u64 * BYTES_PER_OUTPUT + BYTES_OVERHEAD;
    let size_kb = BigDecimal::from(bytes) / BigDecimal::from(1000);
    Money::round_half_even(size_kb * min_fee_rate_evr_per_kb)
}

impl PayoutEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        rpc: NodeRpcClient,
        fee_address: String,
        min_fee_rate_evr_per_kb: BigDecimal,
        max_payout_attempts: u32,
        payout_retry_delay: Duration,
        payout_batch_size: i64,
    ) -> Self {
        Self {
            pool,
            rpc,
            fee_address,
            min_fee_rate_evr_per_kb,
            max_payout_attempts,
            payout_retry_delay,
            payout_batch_size,
            metrics: Arc::new(Metrics::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Signals the run loop to stop after its current iteration.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("payout engine stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.metrics.record_tick();
                    if let Err(err) = self.poll_once().await {
                        tracing::warn!(?err, "payout poll failed");
                    }
                }
            }
        }
    }

    /// Picks up at most `payout_batch_size` paid orders of each kind and
    /// attempts each one in isolation: a single order's failure never stops
    /// the batch.
    pub async fn poll_once(&self) -> DomainResult<()> {
        let order_ids: Vec<OrderId> = {
            let mut conn = self.pool.acquire().await?;
            orders::paid_unclaimed(&mut conn, self.payout_batch_size)
                .await?
                .into_iter()
                .map(|row| OrderId::from(row.id))
                .collect()
        };
        for order_id in order_ids {
            let outcome = match self.process_order(order_id).await {
                Ok(()) => "processed",
                Err(err) => {
                    tracing::warn!(%order_id, ?err, "order payout attempt failed");
                    "failed"
                }
            };
            self.metrics.record("order", outcome);
        }

        let cart_order_ids: Vec<CartOrderId> = {
            let mut conn = self.pool.acquire().await?;
            cart_orders::paid_unclaimed(&mut conn, self.payout_batch_size)
                .await?
                .into_iter()
                .map(|row| CartOrderId::from(row.id))
                .collect()
        };
        for cart_order_id in cart_order_ids {
            let outcome = match self.process_cart_order(cart_order_id).await {
                Ok(()) => "processed",
                Err(err) => {
                    tracing::warn!(%cart_order_id, ?err, "cart order payout attempt failed");
                    "failed"
                }
            };
            self.metrics.record("cart_order", outcome);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(%order_id))]
    async fn process_order(&self, order_id: OrderId) -> DomainResult<()> {
        {
            let mut conn = self.pool.acquire().await?;
            payouts::ensure_row(&mut conn, order_id).await?;
        }
        let claim = {
            let mut conn = self.pool.acquire().await?;
            payouts::get(&mut conn, order_id).await?
        };
        let Some(claim) = claim else {
            return Ok(());
        };
        if claim.success {
            return Ok(());
        }
        if !self.due_for_attempt(claim.failure_count, claim.last_attempt_at) {
            tracing::debug!("payout still backing off, skipping this tick");
            return Ok(());
        }
        if claim.failure_count as u32 >= self.max_payout_attempts {
            self.fail_order(order_id, "exhausted payout retries").await?;
            return Ok(());
        }

        let result = self.attempt_order(order_id, claim.asset_tx_hash.is_some(), claim.evr_tx_hash.is_some()).await;
        self.record_attempt_outcome(order_id, result).await
    }

    async fn attempt_order(
        &self,
        order_id: OrderId,
        has_asset_leg: bool,
        has_evr_leg: bool,
    ) -> DomainResult<()> {
        let mut conn = self.pool.acquire().await?;
        orders::transition_status(&mut conn, order_id, &[OrderStatus::Paid], OrderStatus::Fulfilling).await?;
        let row = orders::get(&mut conn, order_id)
            .await?
            .ok_or_else(|| not_found_order(order_id))?;
        let order = Order::try_from(row).map_err(|e| DomainError::DatabaseQuery(e.to_string()))?;
        let item_rows = orders::items_for_order(&mut conn, order_id).await?;
        let items: Vec<OrderItem> = item_rows.into_iter().map(OrderItem::from).collect();

        let listing_row = listings::get(&mut conn, order.listing_id)
            .await?
            .ok_or_else(|| DomainError::NotFound {
                entity: "listing",
                id: order.listing_id.to_string(),
            })?;
        let listing = Listing::try_from(listing_row).map_err(|e| DomainError::DatabaseQuery(e.to_string()))?;
        drop(conn);

        let payout_items: Vec<PayoutItem> = items
            .iter()
            .map(|item| PayoutItem {
                listing_id: order.listing_id,
                asset_name: item.asset_name.clone(),
                amount: item.amount.clone(),
                price_evr: item.price_evr.clone(),
                fee_evr: item.fee_evr.clone(),
                seller_address: listing.payout_address.clone().unwrap_or_else(|| listing.seller_address.clone()),
                deposit_address: listing.deposit_address.clone(),
            })
            .collect();

        if !has_asset_leg {
            let tx_hashes = self.broadcast_asset_leg(&payout_items, &order.buyer_address).await?;
            let joined = tx_hashes.join(",");
            let mut conn = self.pool.acquire().await?;
            payouts::record_asset_leg(&mut conn, order_id, &joined).await?;
            for (item, tx_hash) in payout_items.iter().zip(tx_hashes.iter()) {
                orders::record_fulfillment(&mut conn, order_id, &item.asset_name, tx_hash).await?;
            }
        }

        if !has_evr_leg {
            let overpayment = order.overpayment();
            let (txid, fees_paid) = self
                .broadcast_coin_leg(&order.payment_address, &payout_items, &order.buyer_address, overpayment)
                .await?;
            let mut conn = self.pool.acquire().await?;
            payouts::record_evr_leg(&mut conn, order_id, &txid, &fees_paid).await?;
        }

        let mut conn = self.pool.acquire().await?;
        for item in &payout_items {
            sale_history::insert(
                &mut conn,
                &SaleHistory {
                    listing_id: item.listing_id,
                    asset_name: item.asset_name.clone(),
                    amount: item.amount.clone(),
                    price_evr: item.price_evr.clone(),
                    seller_address: item.seller_address.clone(),
                    buyer_address: order.buyer_address.clone(),
                    sale_time: Utc::now(),
                    order_id: Some(order_id),
                    cart_order_id: None,
                },
            )
            .await?;
        }
        orders::transition_status(&mut conn, order_id, &[OrderStatus::Fulfilling], OrderStatus::Completed).await?;
        tracing::info!(%order_id, "order payout completed");
        Ok(())
    }

    /// Draws each item's asset from its listing's deposit address to the
    /// buyer, one `transferfromaddress` call per item; returns one tx hash
    /// per item, in the same order.
    async fn broadcast_asset_leg(&self, items: &[PayoutItem], buyer_address: &str) -> DomainResult<Vec<String>> {
        let mut hashes = Vec::with_capacity(items.len());
        for item in items {
            let returned = self
                .rpc
                .transferfromaddress(
                    &item.asset_name,
                    &item.deposit_address,
                    item.amount.as_bigdecimal(),
                    buyer_address,
                    Some(&item.deposit_address),
                )
                .await
                .map_err(|_| DomainError::PayoutFailed {
                    stage: PayoutStage::AssetBroadcast,
                    message: format!("transferfromaddress failed for {}", item.asset_name),
                })?;
            let tx_hash = returned.into_iter().next().ok_or_else(|| DomainError::PayoutFailed {
                stage: PayoutStage::AssetBroadcast,
                message: format!("no txid returned transferring {}", item.asset_name),
            })?;
            tracing::info!(asset_name = %item.asset_name, %tx_hash, "asset leg broadcast");
            hashes.push(tx_hash);
        }
        Ok(hashes)
    }

    /// Builds and broadcasts the single coin transaction spending
    /// `payment_address`'s UTXOs: one output per distinct seller, one to the
    /// fee address (minus the estimated network fee), and a refund output if
    /// the buyer overpaid. Returns the broadcast txid and the network fee
    /// actually absorbed.
    async fn broadcast_coin_leg(
        &self,
        payment_address: &str,
        items: &[PayoutItem],
        buyer_address: &str,
        overpayment: Option<Money>,
    ) -> DomainResult<(String, Money)> {
        let utxos = self
            .rpc
            .getaddressutxos(&[payment_address.to_string()], None)
            .await
            .map_err(|_| DomainError::PayoutFailed {
                stage: PayoutStage::EvrBuild,
                message: "failed to list payment address utxos".to_string(),
            })?;
        if utxos.is_empty() {
            return Err(DomainError::PayoutFailed {
                stage: PayoutStage::EvrBuild,
                message: "payment address has no utxos to spend".to_string(),
            });
        }
        let inputs: Vec<RawTxInput> = utxos
            .iter()
            .map(|u| RawTxInput { txid: u.txid.clone(), vout: u.vout })
            .collect();

        let mut seller_totals: Vec<(String, Money)> = Vec::new();
        for item in items {
            let net = item.price_evr.checked_sub(&item.fee_evr).unwrap_or_else(Money::zero);
            match seller_totals.iter_mut().find(|(addr, _)| addr == &item.seller_address) {
                Some((_, total)) => *total += &net,
                None => seller_totals.push((item.seller_address.clone(), net)),
            }
        }
        let total_fee: Money = items.iter().map(|i| i.fee_evr.clone()).sum();

        let mut num_outputs = seller_totals.len() + 1;
        if overpayment.is_some() {
            num_outputs += 1;
        }
        let network_fee = estimate_network_fee(&self.min_fee_rate_evr_per_kb, inputs.len(), num_outputs);
        let fee_output = total_fee.checked_sub(&network_fee).unwrap_or_else(|| {
            tracing::warn!("network fee exceeds platform fee, fee output floored at zero");
            Money::zero()
        });

        let mut outputs: Map<String, Value> = Map::new();
        for (address, amount) in &seller_totals {
            merge_output(&mut outputs, address, amount);
        }
        if !fee_output.is_zero() {
            merge_output(&mut outputs, &self.fee_address, &fee_output);
        }
        if let Some(refund) = &overpayment {
            merge_output(&mut outputs, buyer_address, refund);
        }

        let hex = self
            .rpc
            .createrawtransaction(&inputs, &Value::Object(outputs))
            .await
            .map_err(|_| DomainError::PayoutFailed {
                stage: PayoutStage::EvrBuild,
                message: "createrawtransaction failed".to_string(),
            })?;
        let signed = self.rpc.signrawtransaction(&hex).await.map_err(|_| DomainError::PayoutFailed {
            stage: PayoutStage::EvrSign,
            message: "signrawtransaction failed".to_string(),
        })?;
        if !signed.complete {
            return Err(DomainError::PayoutFailed {
                stage: PayoutStage::EvrSign,
                message: "signrawtransaction returned an incomplete signature set".to_string(),
            });
        }
        let txid = self.rpc.sendrawtransaction(&signed.hex).await.map_err(|_| DomainError::PayoutFailed {
            stage: PayoutStage::EvrBroadcast,
            message: "sendrawtransaction failed".to_string(),
        })?;
        tracing::info!(%txid, "coin leg broadcast");
        Ok((txid, network_fee))
    }

    #[tracing::instrument(skip(self), fields(%cart_order_id))]
    async fn process_cart_order(&self, cart_order_id: CartOrderId) -> DomainResult<()> {
        {
            let mut conn = self.pool.acquire().await?;
            payouts::ensure_cart_row(&mut conn, cart_order_id).await?;
        }
        let claim = {
            let mut conn = self.pool.acquire().await?;
            payouts::get_cart(&mut conn, cart_order_id).await?
        };
        let Some(claim) = claim else {
            return Ok(());
        };
        if claim.success {
            return Ok(());
        }
        if !self.due_for_attempt(claim.failure_count, claim.last_attempt_at) {
            tracing::debug!("cart payout still backing off, skipping this tick");
            return Ok(());
        }
        if claim.failure_count as u32 >= self.max_payout_attempts {
            self.fail_cart_order(cart_order_id, "exhausted payout retries").await?;
            return Ok(());
        }

        let result = self
            .attempt_cart_order(cart_order_id, claim.asset_tx_hash.is_some(), claim.evr_tx_hash.is_some())
            .await;
        self.record_cart_attempt_outcome(cart_order_id, result).await
    }

    async fn attempt_cart_order(
        &self,
        cart_order_id: CartOrderId,
        has_asset_leg: bool,
        has_evr_leg: bool,
    ) -> DomainResult<()> {
        let mut conn = self.pool.acquire().await?;
        cart_orders::transition_status(&mut conn, cart_order_id, &[OrderStatus::Paid], OrderStatus::Fulfilling)
            .await?;
        let row = cart_orders::get(&mut conn, cart_order_id)
            .await?
            .ok_or_else(|| not_found_cart_order(cart_order_id))?;
        let order = CartOrder::try_from(row).map_err(|e| DomainError::DatabaseQuery(e.to_string()))?;
        let item_rows = cart_orders::items_for_order(&mut conn, cart_order_id).await?;
        let items: Vec<CartOrderItem> = item_rows.into_iter().map(CartOrderItem::from).collect();

        let mut payout_items = Vec::with_capacity(items.len());
        for item in &items {
            let listing_row = listings::get(&mut conn, item.listing_id)
                .await?
                .ok_or_else(|| DomainError::NotFound {
                    entity: "listing",
                    id: item.listing_id.to_string(),
                })?;
            let listing = Listing::try_from(listing_row).map_err(|e| DomainError::DatabaseQuery(e.to_string()))?;
            payout_items.push(PayoutItem {
                listing_id: item.listing_id,
                asset_name: item.asset_name.clone(),
                amount: item.amount.clone(),
                price_evr: item.price_evr.clone(),
                fee_evr: item.fee_evr.clone(),
                seller_address: listing.payout_address.unwrap_or_else(|| item.seller_address.clone()),
                deposit_address: listing.deposit_address,
            });
        }
        drop(conn);

        if !has_asset_leg {
            let tx_hashes = self.broadcast_asset_leg(&payout_items, &order.buyer_address).await?;
            let joined = tx_hashes.join(",");
            let mut conn = self.pool.acquire().await?;
            payouts::record_cart_asset_leg(&mut conn, cart_order_id, &joined).await?;
            for (item, tx_hash) in payout_items.iter().zip(tx_hashes.iter()) {
                cart_orders::record_fulfillment(&mut conn, cart_order_id, item.listing_id, &item.asset_name, tx_hash)
                    .await?;
            }
        }

        if !has_evr_leg {
            let overpayment = order.confirmed_paid_evr.checked_sub(&order.total_payment_evr).filter(|o| !o.is_zero());
            let (txid, fees_paid) = self
                .broadcast_coin_leg(&order.payment_address, &payout_items, &order.buyer_address, overpayment)
                .await?;
            let mut conn = self.pool.acquire().await?;
            payouts::record_cart_evr_leg(&mut conn, cart_order_id, &txid, &fees_paid).await?;
        }

        let mut conn = self.pool.acquire().await?;
        for item in &payout_items {
            sale_history::insert(
                &mut conn,
                &SaleHistory {
                    listing_id: item.listing_id,
                    asset_name: item.asset_name.clone(),
                    amount: item.amount.clone(),
                    price_evr: item.price_evr.clone(),
                    seller_address: item.seller_address.clone(),
                    buyer_address: order.buyer_address.clone(),
                    sale_time: Utc::now(),
                    order_id: None,
                    cart_order_id: Some(cart_order_id),
                },
            )
            .await?;
        }
        cart_orders::transition_status(&mut conn, cart_order_id, &[OrderStatus::Fulfilling], OrderStatus::Completed)
            .await?;
        tracing::info!(%cart_order_id, "cart order payout completed");
        Ok(())
    }

    /// First attempt always runs immediately; subsequent attempts wait out
    /// `payout_retry_delay` since the last one.
    fn due_for_attempt(&self, failure_count: i32, last_attempt_at: Option<chrono::DateTime<Utc>>) -> bool {
        if failure_count == 0 {
            return true;
        }
        match last_attempt_at {
            Some(last) => Utc::now() - last >= chrono::Duration::from_std(self.payout_retry_delay).unwrap_or_default(),
            None => true,
        }
    }

    async fn record_attempt_outcome(&self, order_id: OrderId, result: DomainResult<()>) -> DomainResult<()> {
        if let Err(err) = &result {
            let mut conn = self.pool.acquire().await?;
            let failure_count = payouts::record_failure(&mut conn, order_id, &err.to_string()).await?;
            if failure_count as u32 >= self.max_payout_attempts {
                drop(conn);
                self.fail_order(order_id, &err.to_string()).await?;
            }
        }
        result
    }

    async fn record_cart_attempt_outcome(
        &self,
        cart_order_id: CartOrderId,
        result: DomainResult<()>,
    ) -> DomainResult<()> {
        if let Err(err) = &result {
            let mut conn = self.pool.acquire().await?;
            let failure_count = payouts::record_cart_failure(&mut conn, cart_order_id, &err.to_string()).await?;
            if failure_count as u32 >= self.max_payout_attempts {
                drop(conn);
                self.fail_cart_order(cart_order_id, &err.to_string()).await?;
            }
        }
        result
    }

    async fn fail_order(&self, order_id: OrderId, reason: &str) -> DomainResult<()> {
        let mut conn = self.pool.acquire().await?;
        orders::transition_status(&mut conn, order_id, &[OrderStatus::Fulfilling], OrderStatus::Failed).await?;
        tracing::error!(%order_id, %reason, "order payout abandoned after exhausting retries");
        Ok(())
    }

    async fn fail_cart_order(&self, cart_order_id: CartOrderId, reason: &str) -> DomainResult<()> {
        let mut conn = self.pool.acquire().await?;
        cart_orders::transition_status(&mut conn, cart_order_id, &[OrderStatus::Fulfilling], OrderStatus::Failed)
            .await?;
        tracing::error!(%cart_order_id, %reason, "cart order payout abandoned after exhausting retries");
        Ok(())
    }
}

fn merge_output(outputs: &mut Map<String, Value>, address: &str, amount: &Money) {
    let existing = outputs
        .get(address)
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<BigDecimal>().ok());
    let combined = match existing {
        Some(prev) => Money::from(prev + amount.as_bigdecimal()),
        None => amount.clone(),
    };
    outputs.insert(address.to_string(), json!(combined.to_string()));
}

fn not_found_order(id: OrderId) -> DomainError {
    DomainError::NotFound { entity: "order", id: id.to_string() }
}

fn not_found_cart_order(id: CartOrderId) -> DomainError {
    DomainError::NotFound { entity: "cart_order", id: id.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn network_fee_estimate_scales_with_inputs_and_outputs() {
        let rate = BigDecimal::from_str("0.0101").unwrap();
        let fee = estimate_network_fee(&rate, 1, 2);
        // (148 + 68 + 10) bytes = 226 bytes -> 0.226 kB * 0.0101 EVR/kB
        assert_eq!(fee.to_string(), "0.00228260");
    }

    #[test]
    fn merge_output_combines_same_address() {
        let mut outputs = Map::new();
        merge_output(&mut outputs, "addr1", &Money::from_str("1.5").unwrap());
        merge_output(&mut outputs, "addr1", &Money::from_str("2.5").unwrap());
        assert_eq!(outputs.get("addr1").unwrap().as_str().unwrap(), "4.00000000");
    }

    #[test]
    fn seller_net_share_excludes_its_own_fee() {
        let price = Money::from_str("112.5").unwrap();
        let fee = Money::from_str("1.125").unwrap();
        let net = price.checked_sub(&fee).unwrap();
        assert_eq!(net.to_string(), "111.37500000");
    }
}
