pub mod dedup;
pub mod document_store;

pub use dedup::*;
pub use document_store::*;
