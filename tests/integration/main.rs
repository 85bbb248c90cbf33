//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises one area of the channel
//! engine end to end: two (or three) simulated contexts wired through the
//! loopback transport and driven by the virtual-clock scheduler.

mod callback_tests;
mod harness;
mod lifecycle_tests;
