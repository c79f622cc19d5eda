//! HDC (HarmonyOS Device Connector) backend.

mod connection;
mod device;
pub mod input;

pub use connection::HdcConnection;
pub use device::HdcDriver;
