use std::sync::Arc;

use crate::display::Display;

/// Delay between two samples of a debounced read, in ms
pub const READ_DELAY_MS: u32 = 1;

/// Named digital inputs of the operator board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Input {
    Open,
    Close,
    Stop,
    OpenLimit,
    CloseLimit,
    /// Encoder clock line (signal A)
    Up,
    /// Encoder data line (signal B)
    Down,
    /// Encoder push button
    Select,
}

/// Named digital outputs of the operator board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Output {
    Open,
    Close,
    Stop,
    Counter,
}

impl Output {
    /// Outputs that make the door move and must stay low while stopped
    pub const MOTOR: [Output; 3] = [Output::Open, Output::Close, Output::Counter];
}

/// Analog sensor channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Current,
    Temperature,
}

/// Raw pin access. Implementations are shared between the main loop and
/// the stop handler so every call takes `&self`.
pub trait DigitalIo: Send + Sync {
    fn read(&self, input: Input) -> bool;
    fn write(&self, output: Output, level: bool);
}

pub trait AnalogInput: Send + Sync {
    /// Raw conversion scaled to the full `u16` range
    fn read_raw(&self, channel: Channel) -> u16;
}

pub trait Delay: Send + Sync {
    fn delay_ms(&self, ms: u32);
    fn delay_us(&self, us: u32);
}

/// Every collaborator the control core talks to
#[derive(Clone)]
pub struct Board {
    pub io: Arc<dyn DigitalIo>,
    pub display: Arc<dyn Display>,
    pub analog: Arc<dyn AnalogInput>,
    pub delay: Arc<dyn Delay>,
}

impl Board {
    /// Reads `input` `repeats` times, `READ_DELAY_MS` apart.
    /// Confirmed only if every sample is active.
    pub fn confirm(&self, input: Input, repeats: u8) -> bool {
        debounced_read(&*self.io, &*self.delay, input, repeats)
    }
}

pub fn debounced_read(io: &dyn DigitalIo, delay: &dyn Delay, input: Input, repeats: u8) -> bool {
    let repeats = repeats.max(1);
    let mut active = 0;
    for _ in 0..repeats {
        if io.read(input) {
            active += 1;
        }
        delay.delay_ms(READ_DELAY_MS);
    }
    active == repeats
}
