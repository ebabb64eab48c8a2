//! Command implementations for sluice-cmd

pub mod events;
pub mod generate;
pub mod letters;
pub mod rwlock;
