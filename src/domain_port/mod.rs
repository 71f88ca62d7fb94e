// session

mod document_session;
mod query;
mod unit_of_work;

pub use document_session::*;
pub use query::*;
pub use unit_of_work::*;

// listeners

mod listener;

pub use listener::*;
