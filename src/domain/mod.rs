pub mod entry;
pub mod resource;

pub use entry::*;
pub use resource::*;
