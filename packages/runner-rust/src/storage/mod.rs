//! [`RowStore`](crate::traits::RowStore) implementations.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{MemoryRowStore, WriteRecord};
#[cfg(feature = "postgres")]
pub use postgres::PostgresRowStore;
