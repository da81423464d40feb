pub mod catalog;
pub mod core;
pub mod sections;
pub mod setup;
pub mod students;
pub mod transition;
