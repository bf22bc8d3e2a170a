#![allow(clippy::missing_docs_in_private_items)]

pub mod executor;
pub mod patterns;

pub use executor::{ToolExecutor, ToolResult};
