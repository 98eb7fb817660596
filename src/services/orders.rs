//! Order and table collaborators
//!
//! The payment core does not own orders or tables; it consumes them
//! through these interfaces. Production wiring uses the Postgres
//! implementations in `database::order_repository`; tests substitute
//! fakes.

use crate::error::AppError;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Preparing,
    Served,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Served => "served",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Some(OrderStatus::Pending),
            "preparing" => Some(OrderStatus::Preparing),
            "served" => Some(OrderStatus::Served),
            "completed" => Some(OrderStatus::Completed),
            "cancelled" | "canceled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// An order can only receive a payment once it has been served (or is
    /// already marked completed)
    pub fn is_payable(&self) -> bool {
        matches!(self, OrderStatus::Served | OrderStatus::Completed)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Available,
    Occupied,
    Reserved,
}

impl TableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Available => "available",
            TableStatus::Occupied => "occupied",
            TableStatus::Reserved => "reserved",
        }
    }
}

impl std::fmt::Display for TableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order summary as seen by the payment core
#[derive(Debug, Clone, Serialize)]
pub struct OrderRecord {
    pub id: Uuid,
    pub order_number: String,
    pub total_amount: BigDecimal,
    pub status: String,
    pub table_id: Option<Uuid>,
    pub tenant_id: Uuid,
}

#[async_trait]
pub trait OrderService: Send + Sync {
    async fn find_order(&self, order_id: Uuid) -> Result<Option<OrderRecord>, AppError>;

    async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<(), AppError>;
}

#[async_trait]
pub trait TableService: Send + Sync {
    async fn update_table_status(
        &self,
        table_id: Uuid,
        status: TableStatus,
    ) -> Result<(), AppError>;
}
