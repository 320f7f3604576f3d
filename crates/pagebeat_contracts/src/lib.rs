#![forbid(unsafe_code)]

pub mod abtest;
pub mod common;
pub mod hit;
pub mod identity;

pub use common::{ContractViolation, EpochMillis, GoalId, Validate};
