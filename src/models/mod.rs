//! Data models shared across pgmap.

pub mod record;
pub mod value;

pub use record::{Entity, Filter, Record};
pub use value::SqlValue;
