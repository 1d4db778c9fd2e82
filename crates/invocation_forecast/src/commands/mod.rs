//! CLI command implementations.

mod device;
pub mod export;
pub mod predict;
pub mod schedule;
pub mod train;

pub use device::init_device;
