use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::entities::product;
use crate::errors::ServiceError;

/// A product as seen through the gateway: the price to snapshot and the
/// stock level at the time of the read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogProduct {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub stock: i32,
}

impl From<product::Model> for CatalogProduct {
    fn from(model: product::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            price: model.price,
            stock: model.stock,
        }
    }
}

/// Seam to the product catalog. Stock is only ever mutated through the
/// conditional decrement and its compensating increment; callers must not
/// decide availability from a prior `get_product` read.
#[async_trait]
pub trait CatalogGateway: Send + Sync {
    /// Looks up a product; `None` for an unknown id.
    async fn get_product(&self, product_id: Uuid) -> Result<Option<CatalogProduct>, ServiceError>;

    /// Atomically decrements stock by `quantity` if at least `quantity`
    /// units remain. Returns `false` when stock was insufficient (or the
    /// product vanished); no partial effect either way.
    async fn conditional_decrement_stock(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<bool, ServiceError>;

    /// Reverses a prior successful decrement of `quantity` units.
    async fn compensating_increment_stock(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError>;
}

/// Catalog gateway over the `products` table.
#[derive(Clone)]
pub struct SeaOrmCatalog {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmCatalog {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CatalogGateway for SeaOrmCatalog {
    #[instrument(skip(self), fields(product_id = %product_id))]
    async fn get_product(&self, product_id: Uuid) -> Result<Option<CatalogProduct>, ServiceError> {
        let product = product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await?;

        Ok(product.map(CatalogProduct::from))
    }

    #[instrument(skip(self))]
    async fn conditional_decrement_stock(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        // Single conditional UPDATE: the `stock >= quantity` predicate and
        // the decrement are one statement, so concurrent orders for the same
        // product serialize here instead of racing a read-then-write.
        let result = product::Entity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).sub(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::Stock.gte(quantity))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }

    #[instrument(skip(self))]
    async fn compensating_increment_stock(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        let result = product::Entity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).add(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            warn!(%product_id, quantity, "compensating increment targeted a missing product");
        }

        Ok(())
    }
}
