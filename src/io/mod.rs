//! Session engine module
//!
//! Command queue, in-flight correlation and the device session task.

pub mod queue;
pub mod session;

// Re-export commonly used types
pub use queue::{CommandQueue, InFlightSlot, COMMAND_TICK, RESPONSE_TIMEOUT};
pub use session::{
    CrDevice, DeviceConfig, DeviceEvent, DeviceState, DEFAULT_ADDRESS, DEFAULT_PORT, POLL_INTERVAL,
};
