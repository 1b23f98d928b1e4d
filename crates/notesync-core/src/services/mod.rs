//! Application-facing services over the database layer.

mod store;

pub use store::{RecordStore, StoreStatus};
