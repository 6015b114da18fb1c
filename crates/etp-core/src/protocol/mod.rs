//! Protocol module - register map, constants and register access.

pub mod constants;
pub mod register;

pub use constants::*;
pub use register::{RegisterAccess, le_u16};
