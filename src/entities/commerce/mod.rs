/// Marketplace entities
pub mod address;
pub mod bag;
pub mod bag_item;
pub mod notification;
pub mod order;
pub mod order_item;
pub mod product;
pub mod store;
pub mod user;

// Re-export entities
pub use address::{Entity as Address, Model as AddressModel};
pub use bag::{Entity as Bag, Model as BagModel};
pub use bag_item::{Entity as BagItem, Model as BagItemModel};
pub use notification::{Entity as Notification, Model as NotificationModel};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus, PaymentStatus};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use product::{Entity as Product, Model as ProductModel};
pub use store::{Entity as Store, Model as StoreModel, StripeSetupStatus};
pub use user::{Entity as User, Model as UserModel};
