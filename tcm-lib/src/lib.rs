pub mod bits;
pub mod bus;
pub mod capture;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod decoder;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod firmware;
pub mod framer;
pub mod gesture;
pub mod health;
pub mod info;
pub mod packet;
pub mod touch;
pub mod transport;

#[cfg(test)]
mod tests;

// Re-export the device handle and the types most callers need
pub use bus::{Bus, I2cBus};
pub use config::TcmConfig;
pub use device::TcmDevice;
pub use dispatcher::TriggerReason;
pub use error::TcmError;
pub use info::FirmwareMode;
pub use packet::{Command, MessageCode};
