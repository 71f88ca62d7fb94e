mod identity_error;
mod identity_store;

pub use identity_error::*;
pub use identity_store::*;
