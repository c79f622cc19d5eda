//! ADB (Android Debug Bridge) module for device interaction.

mod connection;
mod device;
pub mod input;

pub use connection::AdbConnection;
pub use device::AdbDriver;
