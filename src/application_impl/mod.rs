mod document_user_store;

pub use document_user_store::*;
