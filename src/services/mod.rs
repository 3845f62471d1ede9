pub mod commerce;
pub mod notifications;
pub mod orders;
pub mod payments;
