//! Command implementations for the Parple CLI.

pub mod ask;
pub mod companion;
pub mod events;
pub mod status;
