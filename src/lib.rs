pub mod config;
pub mod controller;
pub mod error;
pub mod hooks;
pub mod listener;
pub mod logging;
pub mod plugins;
pub mod smtp;

pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
