//! Metadata persistence and write leadership
//!
//! - `store`: the transactional gateway contract every other layer uses.
//! - `stores`: the SeaORM implementation of that contract.
//! - `leader`: zone and file leader election on top of the gateway.
pub(crate) mod backoff;
pub mod config;
pub mod entities;
pub mod factory;
pub mod leader;
pub mod store;
pub mod stores;

pub use factory::{create_meta_store, create_meta_store_from_url};
pub use store::{MetaStore, MetaTxn};
