#![forbid(unsafe_code)]

pub mod command;
pub mod controller;
pub mod event_loop;

pub use controller::{SessionController, SessionSettings};
pub use event_loop::{LoopChannels, run_event_loop};
