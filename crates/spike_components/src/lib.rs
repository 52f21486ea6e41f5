//! Spike sorting components for the `spike_beans` wiring core.
//!
//! Every component here is an ordinary [`Component`](spike_beans::Component):
//! it reaches its upstream through named features resolved by the broker,
//! memoises what it computes, and is invalidated by the update cascade.

#[macro_use]
extern crate spike_beans;

pub mod capability;
pub mod components;
pub mod io;


// Re-export commonly used types
pub use capability::*;
pub use components::*;
pub use io::*;
