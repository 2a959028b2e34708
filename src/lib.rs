//! Motion-control core of the Harmonie gate operator.
//!
//! The door sequencer ([`door`]), the emergency stop latch ([`stop`]) and
//! the encoder driven configuration menu ([`menu`]) run against the board
//! collaborators of [`io`] and [`display`]. The `hal` feature provides the
//! ESP-IDF implementations of those collaborators.

pub mod app;
pub mod config;
pub mod context;
pub mod display;
pub mod door;
pub mod io;
pub mod menu;
pub mod rotary;
pub mod sensor;
pub mod stop;
pub mod task;

#[cfg(feature = "hal")]
pub mod hal;

#[cfg(test)]
mod testing;
