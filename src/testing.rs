//! Scriptable board for the unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::display::FrameBuffer;
use crate::io::{AnalogInput, Board, Channel, Delay, DigitalIo, Input, Output};

/// Inputs read from scripted queues, outputs recorded
#[derive(Default)]
pub struct FakeIo {
    inputs: Mutex<HashMap<Input, VecDeque<bool>>>,
    outputs: Mutex<HashMap<Output, bool>>,
    writes: Mutex<Vec<(Output, bool)>>,
}

impl FakeIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, input: Input, level: bool) {
        self.set_sequence(input, &[level]);
    }

    /// Successive reads return `levels` in order, the last one sticks
    pub fn set_sequence(&self, input: Input, levels: &[bool]) {
        let mut inputs = self.inputs.lock().unwrap();
        inputs.insert(input, levels.iter().copied().collect());
    }

    pub fn level(&self, output: Output) -> bool {
        self.outputs.lock().unwrap().get(&output).copied().unwrap_or(false)
    }

    /// Every write so far, oldest first
    pub fn writes(&self) -> Vec<(Output, bool)> {
        self.writes.lock().unwrap().clone()
    }

    /// True if `output` was ever driven high
    pub fn pulsed(&self, output: Output) -> bool {
        self.writes.lock().unwrap().contains(&(output, true))
    }
}

impl DigitalIo for FakeIo {
    fn read(&self, input: Input) -> bool {
        let mut inputs = self.inputs.lock().unwrap();
        match inputs.get_mut(&input) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(false),
            Some(queue) => queue.front().copied().unwrap_or(false),
            None => false,
        }
    }

    fn write(&self, output: Output, level: bool) {
        self.outputs.lock().unwrap().insert(output, level);
        self.writes.lock().unwrap().push((output, level));
    }
}

type DelayHook = Box<dyn FnMut(u64) + Send>;

#[derive(Default)]
struct Clock {
    us: u64,
    calls: Vec<u32>,
}

/// Virtual clock. Nothing sleeps, every delay is accounted for.
#[derive(Default)]
pub struct FakeDelay {
    clock: Mutex<Clock>,
    hook: Mutex<Option<DelayHook>>,
}

impl FakeDelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.clock.lock().unwrap().us / 1000
    }

    pub fn elapsed_us(&self) -> u64 {
        self.clock.lock().unwrap().us
    }

    /// Number of `delay_ms` calls with exactly `ms`
    pub fn count(&self, ms: u32) -> usize {
        self.clock.lock().unwrap().calls.iter().filter(|&&c| c == ms).count()
    }

    /// Runs `hook` after every `delay_ms` with the elapsed time in ms
    pub fn on_delay<F>(&self, hook: F)
    where
        F: FnMut(u64) + Send + 'static,
    {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn clear_hook(&self) {
        *self.hook.lock().unwrap() = None;
    }
}

impl Delay for FakeDelay {
    fn delay_ms(&self, ms: u32) {
        let elapsed = {
            let mut clock = self.clock.lock().unwrap();
            clock.us += u64::from(ms) * 1000;
            clock.calls.push(ms);
            clock.us / 1000
        };
        let mut hook = self.hook.lock().unwrap();
        if let Some(hook) = hook.as_mut() {
            hook(elapsed);
        }
    }

    fn delay_us(&self, us: u32) {
        self.clock.lock().unwrap().us += u64::from(us);
    }
}

/// Analog source replaying a fixed sequence, the last value sticks
pub struct FakeAnalog {
    values: Mutex<VecDeque<u16>>,
}

impl FakeAnalog {
    pub fn constant(value: u16) -> Self {
        Self::sequence(&[value])
    }

    pub fn sequence(values: &[u16]) -> Self {
        FakeAnalog {
            values: Mutex::new(values.iter().copied().collect()),
        }
    }
}

impl AnalogInput for FakeAnalog {
    fn read_raw(&self, _channel: Channel) -> u16 {
        let mut values = self.values.lock().unwrap();
        if values.len() > 1 {
            values.pop_front().unwrap_or(0)
        } else {
            values.front().copied().unwrap_or(0)
        }
    }
}

/// A 4x20 board with every collaborator faked
pub fn board() -> (Board, Arc<FakeIo>, Arc<FrameBuffer>, Arc<FakeDelay>) {
    let io = Arc::new(FakeIo::new());
    let lcd = Arc::new(FrameBuffer::new(4, 20));
    let delay = Arc::new(FakeDelay::new());
    let board = Board {
        io: io.clone(),
        display: lcd.clone(),
        analog: Arc::new(FakeAnalog::constant(0)),
        delay: delay.clone(),
    };
    (board, io, lcd, delay)
}
