use esp_idf_hal::delay::{Ets, FreeRtos};

use crate::io::Delay;

/// Millisecond waits yield to the scheduler, microsecond waits spin
#[derive(Debug, Default, Clone, Copy)]
pub struct EspDelay;

impl Delay for EspDelay {
    fn delay_ms(&self, ms: u32) {
        FreeRtos::delay_ms(ms);
    }

    fn delay_us(&self, us: u32) {
        Ets::delay_us(us);
    }
}
