//! Blockchain Monitor: turns ZMQ notifications into `transaction_entries`
//! rows and propagates the resulting balance deltas into listings and
//! orders. Balance-conservation logic classifies each observation taken
//! on its own (brand new / already seen / just crossed the confirmation
//! threshold) and applies exactly the listing or order update that
//! transition calls for, keeping the DB-side columns in sync without a
//! trigger (see DESIGN.md).

use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use database::{blocks, cart_orders, listing_addresses, orders, transaction_entries};
use domain::{
    error::DomainResult,
    ids::{CartOrderId, ListingId, OrderId},
    ledger::{Block, TransactionEntry},
    money::{Money, NATIVE_ASSET},
    status::EntryType,
};
use listings::ListingManager;
use node_rpc::NodeRpcClient;
use zmq_ingest::Notification;

use crate::metrics::Metrics;

/// Which entity a tracked deposit address belongs to, resolved once per
/// observation before any balance update is applied.
#[derive(Clone, Copy, Debug)]
enum CreditTarget {
    Listing(ListingId),
    Order(OrderId),
    CartOrder(CartOrderId),
}

/// What a single `(before confirmations, after confirmations)` observation
/// means for the listing/order balance it feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BalanceTransition {
    /// First time this entry has ever been seen, still below threshold.
    NewPending,
    /// First time this entry has ever been seen, already at/above threshold
    /// (e.g. caught up by reconciliation after a restart).
    NewConfirmed,
    /// Previously below threshold, this observation pushes it across.
    JustConfirmed,
    /// Already applied in a prior observation; nothing to do.
    NoOp,
}

fn classify_transition(before: Option<i64>, after: i64, min_confirmations: i64) -> BalanceTransition {
    match before {
        None if after >= min_confirmations => BalanceTransition::NewConfirmed,
        None => BalanceTransition::NewPending,
        Some(prev) if prev >= min_confirmations => BalanceTransition::NoOp,
        Some(_) if after >= min_confirmations => BalanceTransition::JustConfirmed,
        Some(_) => BalanceTransition::NoOp,
    }
}

pub struct Monitor {
    pool: PgPool,
    rpc: NodeRpcClient,
    listings: ListingManager,
    min_confirmations: i64,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
}

impl Monitor {
    pub fn new(pool: PgPool, rpc: NodeRpcClient, listings: ListingManager, min_confirmations: i64) -> Self {
        Self {
            pool,
            rpc,
            listings,
            min_confirmations,
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

    /// Runs until cancelled or the notification channel closes, first
    /// catching up any blocks processed since the last restart.
    pub async fn run(self: Arc<Self>, mut notifications: mpsc::Receiver<Notification>) {
        if let Err(err) = self.reconcile_from_last().await {
            tracing::warn!(?err, "startup reconciliation failed");
        }
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("ledger monitor stopping");
                    break;
                }
                maybe = notifications.recv() => {
                    match maybe {
                        Some(notification) => self.handle_notification(notification).await,
                        None => {
                            tracing::warn!("zmq notification channel closed, stopping monitor");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn handle_notification(&self, notification: Notification) {
        match notification {
            Notification::HashTx { hash, .. } => {
                let outcome = match self.ingest_tx(&hash).await {
                    Ok(()) => "processed",
                    Err(err) => {
                        tracing::warn!(tx_hash = %hash, ?err, "tx ingest failed");
                        "failed"
                    }
                };
                self.metrics.record("tx", outcome);
            }
            Notification::HashBlock { hash, .. } => {
                let outcome = match self.process_block(&hash).await {
                    Ok(()) => "processed",
                    Err(err) => {
                        tracing::warn!(block_hash = %hash, ?err, "block processing failed");
                        "failed"
                    }
                };
                self.metrics.record("block", outcome);
            }
            Notification::Sequence { raw } => {
                tracing::debug!(len = raw.len(), "sequence notification (diagnostic only)");
                self.metrics.record("sequence", "observed");
            }
        }
    }

    /// Resolves a `gettransaction` result into `transaction_entries` rows
    /// and applies whatever balance transition each one represents. Drops
    /// notifications for transactions the wallet doesn't recognize.
    #[tracing::instrument(skip(self), fields(%tx_hash))]
    pub async fn ingest_tx(&self, tx_hash: &str) -> DomainResult<()> {
        let result = match self.rpc.gettransaction(tx_hash).await {
            Ok(result) => result,
            Err(err) if node_rpc::is_not_wallet_transaction(&err) => {
                tracing::debug!("not a wallet transaction, dropping");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let tracked: HashSet<String> = {
            let mut conn = self.pool.acquire().await?;
            listing_addresses::tracked_addresses(&mut conn).await?.into_iter().collect()
        };
        let tx_time = result.time.and_then(|t| DateTime::<Utc>::from_timestamp(t, 0));

        for detail in &result.details {
            if detail.category != "receive" {
                continue;
            }
            let Some(address) = &detail.address else { continue };
            if !tracked.contains(address) {
                continue;
            }
            self.ingest_entry(
                tx_hash,
                address,
                NATIVE_ASSET,
                Money::truncate(detail.amount.clone()),
                result.confirmations,
                tx_time,
                detail.vout,
                result.trusted,
                detail.abandoned,
                None,
            )
            .await?;
        }

        for detail in &result.asset_details {
            if detail.category != "receive" {
                continue;
            }
            let (Some(address), Some(asset_name)) = (&detail.destination, &detail.asset_name) else {
                continue;
            };
            if !tracked.contains(address) {
                continue;
            }
            self.ingest_entry(
                tx_hash,
                address,
                asset_name,
                Money::truncate(detail.amount.clone()),
                result.confirmations,
                tx_time,
                detail.vout,
                result.trusted,
                detail.abandoned,
                detail.asset_type.clone(),
            )
            .await?;
        }

        tracing::info!(confirmations = result.confirmations, "ingested transaction");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn ingest_entry(
        &self,
        tx_hash: &str,
        address: &str,
        asset_name: &str,
        amount: Money,
        confirmations: i64,
        time: Option<DateTime<Utc>>,
        vout: Option<i64>,
        trusted: bool,
        abandoned: bool,
        asset_type: Option<String>,
    ) -> DomainResult<()> {
        let target = {
            let mut conn = self.pool.acquire().await?;
            self.resolve_target(&mut conn, address).await?
        };
        let Some(target) = target else {
            tracing::debug!(%address, "receive to an address with no listing/order to credit");
            return Ok(());
        };
        if let CreditTarget::Listing(listing_id) = target {
            self.listings.handle_new_deposit(listing_id, asset_name).await?;
        }

        let mut tx = self.pool.begin().await?;
        let before = transaction_entries::get_receive(&mut tx, tx_hash, address, asset_name).await?;
        let entry = TransactionEntry {
            tx_hash: tx_hash.to_string(),
            address: address.to_string(),
            entry_type: EntryType::Receive,
            asset_name: asset_name.to_string(),
            amount: amount.clone(),
            fee: Money::zero(),
            confirmations,
            time,
            asset_type,
            vout,
            trusted,
            abandoned,
        };
        transaction_entries::upsert_receive(&mut tx, &entry).await?;

        let transition =
            classify_transition(before.map(|row| row.confirmations), confirmations, self.min_confirmations);
        if transition != BalanceTransition::NoOp {
            let divisor = transaction_entries::receive_count(&mut tx, tx_hash, asset_name).await?;
            let shared = amount.divide_by_count(divisor);
            self.apply_transition(&mut tx, target, asset_name, &shared, tx_hash, time, transition)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn resolve_target(
        &self,
        ex: &mut PgConnection,
        address: &str,
    ) -> DomainResult<Option<CreditTarget>> {
        if let Some(listing_uuid) = listing_addresses::find_listing_for_address(ex, address).await? {
            return Ok(Some(CreditTarget::Listing(ListingId::from(listing_uuid))));
        }
        if let Some(order) = orders::get_by_payment_address(ex, address).await? {
            return Ok(Some(CreditTarget::Order(OrderId::from(order.id))));
        }
        if let Some(cart_order) = cart_orders::get_by_payment_address(ex, address).await? {
            return Ok(Some(CreditTarget::CartOrder(CartOrderId::from(cart_order.id))));
        }
        Ok(None)
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_transition(
        &self,
        ex: &mut PgConnection,
        target: CreditTarget,
        asset_name: &str,
        amount: &Money,
        tx_hash: &str,
        tx_time: Option<DateTime<Utc>>,
        transition: BalanceTransition,
    ) -> DomainResult<()> {
        match target {
            CreditTarget::Listing(listing_id) => match transition {
                BalanceTransition::NewPending => {
                    database::listing_balances::credit_pending(ex, listing_id, asset_name, amount).await?
                }
                BalanceTransition::NewConfirmed => {
                    database::listing_balances::credit_pending(ex, listing_id, asset_name, amount).await?;
                    database::listing_balances::confirm_deposit(ex, listing_id, asset_name, amount, tx_hash, tx_time)
                        .await?
                }
                BalanceTransition::JustConfirmed => {
                    database::listing_balances::confirm_deposit(ex, listing_id, asset_name, amount, tx_hash, tx_time)
                        .await?
                }
                BalanceTransition::NoOp => {}
            },
            CreditTarget::Order(order_id) => match transition {
                BalanceTransition::NewPending => orders::credit_pending_payment(ex, order_id, amount).await?,
                BalanceTransition::NewConfirmed => {
                    orders::credit_pending_payment(ex, order_id, amount).await?;
                    orders::credit_confirmed_payment(ex, order_id, amount).await?
                }
                BalanceTransition::JustConfirmed => {
                    orders::credit_confirmed_payment(ex, order_id, amount).await?
                }
                BalanceTransition::NoOp => {}
            },
            CreditTarget::CartOrder(cart_order_id) => match transition {
                BalanceTransition::NewPending => {
                    cart_orders::credit_pending_payment(ex, cart_order_id, amount).await?
                }
                BalanceTransition::NewConfirmed => {
                    cart_orders::credit_pending_payment(ex, cart_order_id, amount).await?;
                    cart_orders::credit_confirmed_payment(ex, cart_order_id, amount).await?
                }
                BalanceTransition::JustConfirmed => {
                    cart_orders::credit_confirmed_payment(ex, cart_order_id, amount).await?
                }
                BalanceTransition::NoOp => {}
            },
        }
        Ok(())
    }

    /// Records the block, advances every tracked entry's confirmation count
    /// by one, and moves any entry that just crossed `min_confirmations`
    /// from pending to confirmed. A no-op if this hash was already recorded,
    /// so a duplicate `hashblock` notification or an overlapping
    /// reconciliation sweep can't double-increment confirmations.
    #[tracing::instrument(skip(self), fields(%block_hash))]
    pub async fn process_block(&self, block_hash: &str) -> DomainResult<()> {
        {
            let mut conn = self.pool.acquire().await?;
            if blocks::get_by_hash(&mut conn, block_hash).await?.is_some() {
                tracing::debug!("block already processed, skipping");
                return Ok(());
            }
        }

        let block_info = self.rpc.getblock(block_hash).await?;
        let timestamp = DateTime::<Utc>::from_timestamp(block_info.time, 0).unwrap_or_else(Utc::now);

        let mut tx = self.pool.begin().await?;
        blocks::insert(
            &mut tx,
            &Block { hash: block_info.hash.clone(), height: block_info.height, timestamp },
        )
        .await?;
        transaction_entries::increment_confirmations_for_new_block(&mut tx).await?;
        let newly_confirmed = transaction_entries::newly_confirmed(&mut tx, self.min_confirmations).await?;
        tx.commit().await?;

        for row in newly_confirmed {
            let tx_hash = row.tx_hash.clone();
            if let Err(err) = self.confirm_observed_entry(row).await {
                tracing::warn!(%tx_hash, ?err, "failed to confirm balance for entry reaching threshold");
            }
        }

        tracing::info!(height = block_info.height, "processed block");
        Ok(())
    }

    async fn confirm_observed_entry(&self, row: transaction_entries::Row) -> DomainResult<()> {
        let mut conn = self.pool.acquire().await?;
        let Some(target) = self.resolve_target(&mut conn, &row.address).await? else {
            return Ok(());
        };
        let divisor = transaction_entries::receive_count(&mut conn, &row.tx_hash, &row.asset_name).await?;
        let shared = Money::from(row.amount).divide_by_count(divisor);
        self.apply_transition(
            &mut conn,
            target,
            &row.asset_name,
            &shared,
            &row.tx_hash,
            row.time,
            BalanceTransition::JustConfirmed,
        )
        .await
    }

    /// Walks every block from `from_height` to the node's current tip,
    /// re-ingesting its transactions and re-running block processing — the
    /// backstop for notifications missed while the process was down or a
    /// ZMQ frame was dropped.
    pub async fn reconcile_since(&self, from_height: i64) -> DomainResult<()> {
        let current = self.rpc.getblockcount().await?;
        if current < from_height {
            return Ok(());
        }
        for height in from_height..=current {
            let hash = match self.rpc.getblockhash(height).await {
                Ok(hash) => hash,
                Err(err) => {
                    tracing::warn!(height, ?err, "reconciliation failed to resolve block hash");
                    continue;
                }
            };
            let block = match self.rpc.getblock(&hash).await {
                Ok(block) => block,
                Err(err) => {
                    tracing::warn!(%hash, ?err, "reconciliation failed to fetch block");
                    continue;
                }
            };
            for txid in &block.tx {
                if let Err(err) = self.ingest_tx(txid).await {
                    tracing::warn!(%txid, ?err, "reconciliation failed to ingest transaction");
                }
            }
            if let Err(err) = self.process_block(&hash).await {
                tracing::warn!(%hash, ?err, "reconciliation failed to process block");
            }
        }
        Ok(())
    }

    /// Reconciles from the block after the highest one recorded locally —
    /// used both at startup and as the periodic backstop `workers` drives.
    pub async fn reconcile_from_last(&self) -> DomainResult<()> {
        let recorded = {
            let mut conn = self.pool.acquire().await?;
            blocks::latest_height(&mut conn).await?
        };
        let from_height = recorded.map(|h| h + 1).unwrap_or(0);
        self.reconcile_since(from_height).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brand_new_entry_below_threshold_is_pending() {
        assert_eq!(classify_transition(None, 0, 6), BalanceTransition::NewPending);
    }

    #[test]
    fn brand_new_entry_already_past_threshold_confirms_immediately() {
        assert_eq!(classify_transition(None, 6, 6), BalanceTransition::NewConfirmed);
    }

    #[test]
    fn crossing_threshold_confirms_once() {
        assert_eq!(classify_transition(Some(5), 6, 6), BalanceTransition::JustConfirmed);
    }

    #[test]
    fn already_confirmed_entry_is_a_no_op() {
        assert_eq!(classify_transition(Some(6), 7, 6), BalanceTransition::NoOp);
    }

    #[test]
    fn still_pending_entry_is_a_no_op() {
        assert_eq!(classify_transition(Some(2), 3, 6), BalanceTransition::NoOp);
    }
}
