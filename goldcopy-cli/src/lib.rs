//! goldcopy CLI library
//!
//! Helpers behind the `goldcopy` binary, split out so they can be tested.

pub mod naming;
pub mod render;
