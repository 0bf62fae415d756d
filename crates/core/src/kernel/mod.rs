//! Stratalake kernel module
//!
//! The kernel module contains the schema, expression, and metadata models the
//! scan planner operates on.

pub mod expressions;
pub mod models;
pub mod schema;

pub use expressions::*;
pub use models::*;
pub use schema::*;
