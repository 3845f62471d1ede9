pub mod bag_service;
pub mod checkout_reference;
pub mod checkout_service;
pub mod currency;

pub use bag_service::{BagService, BagWithItems, DeletedKind, RemoveFromBagResult};
pub use checkout_reference::CheckoutReference;
pub use checkout_service::{CheckoutService, CheckoutSessionResponse};
