use crate::{
    db,
    entities::commerce::{bag, bag_item, product, Bag, BagItem, Product, Store},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, LoaderTrait,
    ModelTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Bag service owning the pre-purchase cart of each (store, buyer) pair.
///
/// A bag only ever holds products from one store. Its totals are kept up to
/// date by store-side increments when items are added, so the bag row never
/// has to be recomputed from its items.
///
/// # Examples
///
/// ```ignore
/// let bag_service = BagService::new(db, event_sender);
///
/// let bag = bag_service.add_to_bag(buyer_id, product_id).await?;
/// assert_eq!(bag.bag.grand_total, bag.bag.sub_total + bag.bag.shipping_total);
/// ```
#[derive(Clone)]
pub struct BagService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl BagService {
    /// Creates a new `BagService` instance.
    ///
    /// # Arguments
    ///
    /// * `db` - Database connection pool
    /// * `event_sender` - Event sender for publishing bag events
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Adds a product to the buyer's bag for the product's store.
    ///
    /// Creates the bag on first add, seeding its totals from the product.
    /// Otherwise the three totals are incremented in the database. The item
    /// insert and the increments share one transaction, so a duplicate
    /// product leaves the totals untouched.
    ///
    /// # Returns
    ///
    /// * `Ok(BagWithItems)` - The bag after the add, with all its items
    /// * `Err(ServiceError::NotFound)` - Product or its store not found
    /// * `Err(ServiceError::BadRequest)` - Buyer owns the store, or the product is sold
    /// * `Err(ServiceError::Conflict)` - Product is already in the bag
    #[instrument(skip(self))]
    pub async fn add_to_bag(
        &self,
        buyer_id: Uuid,
        product_id: Uuid,
    ) -> Result<BagWithItems, ServiceError> {
        let product = Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let store = Store::find_by_id(product.store_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Store {} not found", product.store_id))
            })?;

        if store.user_id == buyer_id {
            return Err(ServiceError::BadRequest(
                "You cannot add your own product to a bag".to_string(),
            ));
        }
        if product.sold {
            return Err(ServiceError::BadRequest(format!(
                "Product {} has already been sold",
                product_id
            )));
        }

        let txn = self.db.begin().await?;
        let now = Utc::now();

        let existing = Bag::find()
            .filter(bag::Column::StoreId.eq(store.id))
            .filter(bag::Column::UserId.eq(buyer_id))
            .one(&txn)
            .await?;

        let (bag_id, created) = match existing {
            Some(bag) => {
                let updated = Bag::update_many()
                    .col_expr(
                        bag::Column::SubTotal,
                        Expr::col(bag::Column::SubTotal).add(product.price),
                    )
                    .col_expr(
                        bag::Column::ShippingTotal,
                        Expr::col(bag::Column::ShippingTotal).add(product.shipping_price),
                    )
                    .col_expr(
                        bag::Column::GrandTotal,
                        Expr::col(bag::Column::GrandTotal)
                            .add(product.price + product.shipping_price),
                    )
                    .col_expr(bag::Column::UpdatedAt, Expr::value(now))
                    .filter(bag::Column::Id.eq(bag.id))
                    .exec(&txn)
                    .await?;
                // Checked out between the read and the increment
                if updated.rows_affected == 0 {
                    return Err(db::rolled_back(
                        "add_to_bag",
                        ServiceError::Conflict(format!("Bag {} was just checked out", bag.id)),
                    ));
                }
                (bag.id, false)
            }
            None => {
                let bag = bag::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    store_id: Set(store.id),
                    user_id: Set(buyer_id),
                    sub_total: Set(product.price),
                    shipping_total: Set(product.shipping_price),
                    grand_total: Set(product.price + product.shipping_price),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
                (bag.id, true)
            }
        };

        let item = snapshot_item(bag_id, &product);
        if let Err(e) = item.insert(&txn).await {
            let err = match ServiceError::from(e) {
                ServiceError::Conflict(_) => ServiceError::Conflict(format!(
                    "Product {} is already in your bag",
                    product_id
                )),
                other => other,
            };
            return Err(db::rolled_back("add_to_bag", err));
        }

        db::commit(txn, "add_to_bag").await?;

        if created {
            self.event_sender.send_or_log(Event::BagCreated(bag_id)).await;
        }
        self.event_sender
            .send_or_log(Event::BagItemAdded { bag_id, product_id })
            .await;

        info!("Added product {} to bag {}", product_id, bag_id);
        self.load_bag(bag_id).await
    }

    /// Removes one item from a bag.
    ///
    /// When the bag holds a single item the whole bag is deleted. Partial
    /// removal leaves the bag totals as they were.
    #[instrument(skip(self))]
    pub async fn remove_from_bag(
        &self,
        buyer_id: Uuid,
        bag_id: Uuid,
        bag_item_id: Uuid,
    ) -> Result<RemoveFromBagResult, ServiceError> {
        let bag = Bag::find_by_id(bag_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Bag {} not found", bag_id)))?;

        if bag.user_id != buyer_id {
            return Err(ServiceError::Unauthorized(
                "Only the bag's owner can remove items".to_string(),
            ));
        }

        let item = BagItem::find_by_id(bag_item_id)
            .filter(bag_item::Column::BagId.eq(bag_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Bag item {} not found", bag_item_id))
            })?;

        let txn = self.db.begin().await?;

        let item_count = BagItem::find()
            .filter(bag_item::Column::BagId.eq(bag_id))
            .count(&txn)
            .await?;

        let deleted = if item_count <= 1 {
            BagItem::delete_many()
                .filter(bag_item::Column::BagId.eq(bag_id))
                .exec(&txn)
                .await?;
            bag.delete(&txn).await?;
            DeletedKind::Bag
        } else {
            item.delete(&txn).await?;
            DeletedKind::BagItem
        };

        db::commit(txn, "remove_from_bag").await?;

        let event = match deleted {
            DeletedKind::Bag => Event::BagDeleted(bag_id),
            DeletedKind::BagItem => Event::BagItemRemoved {
                bag_id,
                item_id: bag_item_id,
            },
        };
        self.event_sender.send_or_log(event).await;

        info!("Removed item {} from bag {} ({:?})", bag_item_id, bag_id, deleted);
        Ok(RemoveFromBagResult { deleted })
    }

    /// Gets a bag with its items.
    ///
    /// Readable by the buyer and by the seller owning the bag's store.
    /// Anyone else gets `NotFound`.
    #[instrument(skip(self))]
    pub async fn get_user_bag(
        &self,
        user_id: Uuid,
        bag_id: Uuid,
    ) -> Result<BagWithItems, ServiceError> {
        let not_found = || ServiceError::NotFound(format!("Bag {} not found", bag_id));

        let bag = Bag::find_by_id(bag_id)
            .one(&*self.db)
            .await?
            .ok_or_else(not_found)?;

        if bag.user_id != user_id {
            let seller_id = Store::find_by_id(bag.store_id)
                .one(&*self.db)
                .await?
                .map(|store| store.user_id);
            if seller_id != Some(user_id) {
                return Err(not_found());
            }
        }

        let items = bag
            .find_related(BagItem)
            .order_by_asc(bag_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        Ok(BagWithItems { bag, items })
    }

    /// All of the buyer's bags with items, newest first
    #[instrument(skip(self))]
    pub async fn get_user_bags(&self, buyer_id: Uuid) -> Result<Vec<BagWithItems>, ServiceError> {
        let bags = Bag::find()
            .filter(bag::Column::UserId.eq(buyer_id))
            .order_by_desc(bag::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        let items = bags.load_many(BagItem, &*self.db).await?;

        Ok(bags
            .into_iter()
            .zip(items)
            .map(|(bag, items)| BagWithItems { bag, items })
            .collect())
    }

    /// Number of items across all of the buyer's bags
    #[instrument(skip(self))]
    pub async fn count_bag_items(&self, buyer_id: Uuid) -> Result<u64, ServiceError> {
        Ok(BagItem::find()
            .join(
                sea_orm::JoinType::InnerJoin,
                bag_item::Relation::Bag.def(),
            )
            .filter(bag::Column::UserId.eq(buyer_id))
            .count(&*self.db)
            .await?)
    }

    async fn load_bag(&self, bag_id: Uuid) -> Result<BagWithItems, ServiceError> {
        let bag = Bag::find_by_id(bag_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Bag {} not found", bag_id)))?;
        let items = bag
            .find_related(BagItem)
            .order_by_asc(bag_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(BagWithItems { bag, items })
    }
}

fn snapshot_item(bag_id: Uuid, product: &product::Model) -> bag_item::ActiveModel {
    bag_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        bag_id: Set(bag_id),
        product_id: Set(product.id),
        name: Set(product.name.clone()),
        description: Set(product.description.clone()),
        images: Set(product.images.clone()),
        price: Set(product.price),
        shipping_price: Set(product.shipping_price),
        created_at: Set(Utc::now()),
    }
}

/// A bag together with its item snapshots
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BagWithItems {
    #[serde(flatten)]
    pub bag: bag::Model,
    pub items: Vec<bag_item::Model>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeletedKind {
    Bag,
    BagItem,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveFromBagResult {
    pub deleted: DeletedKind,
}
