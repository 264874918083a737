//! HTTP handlers.

pub mod carts;
pub mod health;
pub mod monitor;
pub mod shipping;
