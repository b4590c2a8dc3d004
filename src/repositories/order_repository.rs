use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, TransactionTrait,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::order::{self, OrderStatus, PaymentStatus};
use crate::entities::order_item;
use crate::errors::ServiceError;

/// Store for order aggregates: one durable order row plus its line items,
/// keyed by id, with secondary lookup by owner and by status.
#[derive(Debug)]
pub struct OrderRepository {
    db: Arc<DatabaseConnection>,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Persists an order and its line items in a single transaction.
    pub async fn insert_with_items(
        &self,
        order: order::ActiveModel,
        items: Vec<order_item::ActiveModel>,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        let txn = self.db.begin().await?;

        let order_model = order.insert(&txn).await?;
        let mut item_models = Vec::with_capacity(items.len());
        for item in items {
            item_models.push(item.insert(&txn).await?);
        }

        txn.commit().await?;
        Ok((order_model, item_models))
    }

    /// Finds an order by id.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        let order = order::Entity::find_by_id(id).one(&*self.db).await?;
        Ok(order)
    }

    /// Finds an order together with its line items.
    pub async fn find_with_items(
        &self,
        id: Uuid,
    ) -> Result<Option<(order::Model, Vec<order_item::Model>)>, ServiceError> {
        let Some(order) = self.find_by_id(id).await? else {
            return Ok(None);
        };
        let items = self.items_for(id).await?;
        Ok(Some((order, items)))
    }

    /// Line items of one order.
    pub async fn items_for(&self, order_id: Uuid) -> Result<Vec<order_item::Model>, ServiceError> {
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        Ok(items)
    }

    /// Line items of a batch of orders, fetched in one query.
    pub async fn items_for_orders(
        &self,
        order_ids: &[Uuid],
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        if order_ids.is_empty() {
            return Ok(Vec::new());
        }
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.is_in(order_ids.iter().copied()))
            .all(&*self.db)
            .await?;
        Ok(items)
    }

    /// Lists orders newest first, optionally filtered by owner and status.
    pub async fn find_filtered(
        &self,
        customer_id: Option<Uuid>,
        status: Option<OrderStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let mut query = order::Entity::find();
        if let Some(customer_id) = customer_id {
            query = query.filter(order::Column::CustomerId.eq(customer_id));
        }
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status.to_string()));
        }

        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((orders, total))
    }

    /// Marks the order's payment completed and records the gateway
    /// transaction id, but only while the payment is still pending.
    /// Returns the number of rows updated: 0 means another confirmation
    /// already won.
    pub async fn complete_payment(
        &self,
        order_id: Uuid,
        transaction_id: &str,
    ) -> Result<u64, ServiceError> {
        let result = order::Entity::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Completed.to_string()),
            )
            .col_expr(
                order::Column::PaymentTransactionId,
                Expr::value(transaction_id.to_string()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending.to_string()))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }

    /// Moves the order's status from `from` to `to` as a compare-and-set:
    /// the update only applies while the stored status still equals `from`.
    /// Returns the number of rows updated: 0 means a concurrent transition
    /// got there first.
    pub async fn transition_status(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        delivered_at: Option<DateTime<Utc>>,
    ) -> Result<u64, ServiceError> {
        let mut update = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(to.to_string()))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            );

        if let Some(at) = delivered_at {
            update = update.col_expr(order::Column::DeliveredAt, Expr::value(at));
        }

        let result = update
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(from.to_string()))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }
}
