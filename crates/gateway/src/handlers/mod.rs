//! API handlers module

pub mod health;
pub mod pdf;
pub mod query;
pub mod sources;
