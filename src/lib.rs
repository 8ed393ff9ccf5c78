//! Warehouse allocation engine: best-fit storage assignment for incoming
//! items and optimal carrier loading for outbound shipments.

pub mod api;
pub mod audit;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod model;
pub mod optimizer;
pub mod persistence;
pub mod pipeline;
pub mod selector;
pub mod types;
