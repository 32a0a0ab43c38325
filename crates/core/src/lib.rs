//! DisasterGuard Core
//!
//! Domain types and services shared by the console: the analysis backend
//! client, the local key-value store and the operator identity tool.

pub mod analysis;
pub mod identity;
pub mod models;
pub mod store;
