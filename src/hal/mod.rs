//! ESP-IDF implementations of the board collaborators

mod adc;
mod delay;
mod nvs;
mod pins;
mod stop_irq;

pub use adc::EspAdc;
pub use delay::EspDelay;
pub use nvs::NvsConfigStore;
pub use pins::{EspIo, PinMap};
pub use stop_irq::StopInterrupt;
