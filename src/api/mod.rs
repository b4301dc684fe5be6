//! JSON API consumed by the dashboard.

pub mod handlers;
pub mod response;

pub use response::{DiffResponse, ErrorBody};
