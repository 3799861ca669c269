//! Data Transfer Objects for REST request/response serialization.
//!
//! DTOs carry plain strings; identifiers and categories are validated when
//! handlers convert them into domain types.

pub mod change_dto;
pub mod common_dto;

pub use change_dto::*;
pub use common_dto::*;
