//! Run metadata.

mod registry;
mod table;

pub use registry::RunRegistry;
pub use table::RunTable;
