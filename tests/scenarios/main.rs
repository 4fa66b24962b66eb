//! Scenario tests for steppipe

mod helpers;

mod failure_handling;
mod gating;
mod parallel_fanout;
mod resume;
mod serial_fanout;
