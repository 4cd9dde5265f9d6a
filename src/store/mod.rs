pub mod memory;
pub mod traits;

pub use memory::{KeyKind, MemoryStore, TableSpec};
pub use traits::*;
