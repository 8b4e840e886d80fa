//! Command implementations for the Ember CLI.

pub mod evaluate;
pub mod models;
pub mod sync;
pub mod train;
