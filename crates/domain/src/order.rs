//! Order aggregate: single-listing orders, cart (multi-seller) orders, and
//! the payout bookkeeping attached to each.

use chrono::{DateTime, Utc};

use crate::{
    ids::{CartOrderId, ListingId, OrderId},
    money::Money,
    status::OrderStatus,
};

#[derive(Clone, Debug, PartialEq)]
pub struct Order {
    pub id: OrderId,
    pub listing_id: ListingId,
    pub buyer_address: String,
    pub payment_address: String,
    pub status: OrderStatus,
    pub total_price_evr: Money,
    pub fee_evr: Money,
    pub total_payment_evr: Money,
    pub pending_paid_evr: Money,
    pub confirmed_paid_evr: Money,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_fully_paid(&self) -> bool {
        self.confirmed_paid_evr >= self.total_payment_evr
    }

    pub fn overpayment(&self) -> Option<Money> {
        self.confirmed_paid_evr
            .checked_sub(&self.total_payment_evr)
            .filter(|over| !over.is_zero())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderItem {
    pub order_id: OrderId,
    pub asset_name: String,
    pub amount: Money,
    pub price_evr: Money,
    pub fee_evr: Money,
    pub fulfillment_tx_hash: Option<String>,
    pub fulfillment_time: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CartOrder {
    pub id: CartOrderId,
    pub buyer_address: String,
    pub payment_address: String,
    pub status: OrderStatus,
    pub total_price_evr: Money,
    pub fee_evr: Money,
    pub total_payment_evr: Money,
    pub pending_paid_evr: Money,
    pub confirmed_paid_evr: Money,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CartOrderItem {
    pub cart_order_id: CartOrderId,
    pub listing_id: ListingId,
    pub asset_name: String,
    pub amount: Money,
    pub price_evr: Money,
    pub fee_evr: Money,
    pub seller_address: String,
    pub fulfillment_tx_hash: Option<String>,
    pub fulfillment_time: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderPayout {
    pub order_id: OrderId,
    pub success: bool,
    pub failure_count: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub total_fees_paid: Money,
    pub asset_tx_hash: Option<String>,
    pub evr_tx_hash: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CartOrderPayout {
    pub cart_order_id: CartOrderId,
    pub success: bool,
    pub failure_count: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub total_fees_paid: Money,
    pub asset_tx_hash: Option<String>,
    pub evr_tx_hash: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SaleHistory {
    pub listing_id: ListingId,
    pub asset_name: String,
    pub amount: Money,
    pub price_evr: Money,
    pub seller_address: String,
    pub buyer_address: String,
    pub sale_time: DateTime<Utc>,
    pub order_id: Option<OrderId>,
    pub cart_order_id: Option<CartOrderId>,
}

/// A single requested line in an order/cart-order creation call.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderItemRequest {
    pub asset_name: String,
    pub amount: Money,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CartItemRequest {
    pub listing_id: ListingId,
    pub asset_name: String,
    pub amount: Money,
}
