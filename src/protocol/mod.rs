//! License wire formats.

pub mod models;
