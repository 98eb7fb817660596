use crate::database::error::DatabaseError;
use crate::error::AppError;
use crate::services::orders::{OrderRecord, OrderService, OrderStatus, TableService, TableStatus};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
struct OrderRow {
    pub id: Uuid,
    pub order_number: String,
    pub total_amount: bigdecimal::BigDecimal,
    pub status: String,
    pub table_id: Option<Uuid>,
    pub tenant_id: Uuid,
}

impl From<OrderRow> for OrderRecord {
    fn from(row: OrderRow) -> Self {
        OrderRecord {
            id: row.id,
            order_number: row.order_number,
            total_amount: row.total_amount,
            status: row.status,
            table_id: row.table_id,
            tenant_id: row.tenant_id,
        }
    }
}

/// Postgres-backed order collaborator
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderService for OrderRepository {
    async fn find_order(&self, order_id: Uuid) -> Result<Option<OrderRecord>, AppError> {
        let row = sqlx::query_as::<_, OrderRow>(
            "SELECT id, order_number, total_amount, status, table_id, tenant_id \
             FROM orders WHERE id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(row.map(OrderRecord::from))
    }

    async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(order_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}

/// Postgres-backed table collaborator
pub struct TableRepository {
    pool: PgPool,
}

impl TableRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TableService for TableRepository {
    async fn update_table_status(
        &self,
        table_id: Uuid,
        status: TableStatus,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE tables SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(table_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
