//! Academic year transition engine.

pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod resolver;
pub mod rules;
pub mod settings;
pub mod subjects;
pub mod year;

pub use orchestrator::{run, RunMode};
pub use year::AcademicYear;
