//! Platesched - plate scheduling and robot path planning for lab automation
//!
//! Plates from a worklist are admitted a few at a time, dispatched to
//! devices with a free location, and moved between devices by robots along
//! the cheapest path through a graph of every docking place in the lab.
//! Risky hardware actions run as recoverable operations that put failures
//! to an operator.

pub mod device;
pub mod error;
pub mod operation;
pub mod operator;
pub mod planner;
pub mod plate;
pub mod scheduler;
pub mod sim;
pub mod topology;

pub use error::{DeviceError, PlateschedError, Result};
