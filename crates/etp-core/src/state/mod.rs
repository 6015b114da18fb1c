//! State machine module.

pub mod machine;

pub use machine::{
    EepromContext, EepromState, SectionTracker, UpdateContext, UpdateState,
};
