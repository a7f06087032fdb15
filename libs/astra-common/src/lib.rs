pub mod catalog;
pub mod types;
