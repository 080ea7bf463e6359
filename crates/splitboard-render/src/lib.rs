#![forbid(unsafe_code)]

//! Render: canvas and font capabilities, the font registry, and the
//! single-owner animation engine that keeps the panel coherent.

pub mod canvas;
pub mod displayer;
pub mod fonts;
