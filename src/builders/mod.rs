//! Builders that wire the engines, scheduler and workers from configuration.

pub mod system_builder;

pub use system_builder::{ParkingSystem, RunningSystem, SystemBuilder};
