mod redis_session;
mod redis_store;

pub use redis_session::*;
pub use redis_store::*;
