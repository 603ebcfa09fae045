pub mod api;
pub mod database;

pub use api::*;
pub use database::*;
