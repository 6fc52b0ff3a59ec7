pub mod handlers;
pub mod orchestrator;
pub mod report;
pub mod runner;

pub use handlers::*;
pub use orchestrator::*;
pub use report::*;
pub use runner::*;
