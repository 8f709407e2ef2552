//! Chain queries, statement builders and pagination

pub mod builder;
pub mod pagination;
pub mod sql;
pub mod state;

pub use builder::{ChainQuery, PlainQuery};
pub use pagination::Page;
pub use state::{PendingError, QueryState};
