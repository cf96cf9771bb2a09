//! GPU backend implementations.
//!
//! The simulated backend is always available and carries the test suite and
//! headless runs; the Vulkan backend is feature-gated behind
//! `vulkan-backend` and drives a real device.

pub mod sim;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;
