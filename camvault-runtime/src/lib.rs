//! Runtime ports for camvault.
//!
//! This crate provides the three small abstractions every camvault loop is
//! built on, each with a real and a mock implementation:
//! - Clock: current time as Unix seconds
//! - Sleeper: delays between cycles
//! - ShutdownCheck: cooperative cancellation

pub mod clock;
pub mod shutdown;
pub mod sleeper;

pub use clock::{Clock, MockClock, SystemClock};
pub use shutdown::{AlwaysShutdown, CountdownShutdown, NeverShutdown, ShutdownCheck, ShutdownFlag};
pub use sleeper::{MockSleeper, RealSleeper, Sleeper};
