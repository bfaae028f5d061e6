#![forbid(unsafe_code)]

//! Media catalogue backend: catalogue storage, video platform access, and the
//! response shaping that turns both into the public media representation.

pub mod assembler;
pub mod catalogue;
pub mod config;
pub mod platform;
pub mod sources;
