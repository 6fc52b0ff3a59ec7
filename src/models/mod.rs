pub mod document;
pub mod run;
pub mod stage;

pub use document::*;
pub use run::*;
pub use stage::*;
