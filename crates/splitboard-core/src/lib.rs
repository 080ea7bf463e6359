#![forbid(unsafe_code)]

//! Core: colors, text orders, wire codecs, and protocol classification.

pub mod color;
pub mod message;
pub mod order;
pub mod text;
pub mod timing;
pub mod wire;
