use std::sync::Arc;
use std::time::Duration;

use crate::config::SensorConfig;
use crate::context::ControllerContext;
use crate::io::{Board, Channel};
use crate::task::PeriodicTask;

/// Period of the current sampling task
pub const SAMPLE_PERIOD: Duration = Duration::from_millis(500);
/// Pause between two raw samples of a burst, in µs
const BURST_GAP_US: u32 = 10;

const CURRENT_ROW: u8 = 3;
const TEMP_ROW: u8 = 4;

impl SensorConfig {
    /// Units per volt, from the sensitivity in mV per unit
    pub fn scale(&self) -> f32 {
        1000.0 / self.factor
    }

    /// Converts a mean raw reading to the physical unit
    pub fn convert(&self, mean_raw: f32) -> f32 {
        let volts = mean_raw * self.v_max / f32::from(u16::MAX);
        (volts - self.v0_ref) * self.scale()
    }
}

/// Averages `samples` raw readings taken `BURST_GAP_US` apart
pub fn mean_raw(board: &Board, channel: Channel, samples: u8) -> f32 {
    let samples = samples.max(1);
    let mut total = 0u32;
    for _ in 0..samples {
        total += u32::from(board.analog.read_raw(channel));
        board.delay.delay_us(BURST_GAP_US);
    }
    total as f32 / f32::from(samples)
}

/// Reads the motor current, in A
pub fn read_current(board: &Board, config: &SensorConfig) -> f32 {
    config.convert(mean_raw(board, Channel::Current, config.samples))
}

/// Reads the temperature and shows it on the last row
pub fn show_temperature(board: &Board, config: &SensorConfig) -> f32 {
    let temp = config.convert(mean_raw(board, Channel::Temperature, config.samples));
    board
        .display
        .write_line_centered(&format!("Temp: {:>5.1} C", temp), TEMP_ROW);
    temp
}

/// One run of the current sampler: samples and shows the current while a
/// motor output is asserted
pub fn sample_current(ctx: &ControllerContext, board: &Board) -> Option<f32> {
    if !ctx.sampling_armed() {
        return None;
    }
    let config = ctx.config().current;
    if !config.status.is_active() {
        return None;
    }
    let amps = read_current(board, &config);
    // the main loop may have disarmed us during the burst
    if !ctx.sampling_armed() {
        return None;
    }
    board
        .display
        .write_line_centered(&format!("I DC: {:>5.1} A", amps), CURRENT_ROW);
    Some(amps)
}

/// Starts the periodic current sampler
pub fn spawn_current_sampler(ctx: Arc<ControllerContext>, board: Board) -> anyhow::Result<PeriodicTask> {
    PeriodicTask::spawn("current", SAMPLE_PERIOD, move || {
        sample_current(&ctx, &board);
    })
}
