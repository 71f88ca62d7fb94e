mod memory_session;
mod memory_store;

pub use memory_session::*;
pub use memory_store::*;
