pub mod bags;
pub mod checkout;
