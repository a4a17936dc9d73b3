//! HTTP handlers.

pub mod image;
