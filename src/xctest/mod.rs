//! XCTest backend: iOS automation through WebDriverAgent.

mod connection;
mod device;
mod input;

pub use connection::{XcTestConnection, DEFAULT_WDA_URL};
pub use device::{XcTestDriver, SCALE_FACTOR};
