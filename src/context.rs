use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};

use crate::config::Config;
use crate::door::DoorState;
use crate::io::{DigitalIo, Output};

/// State shared between the main loop, the stop handler and the periodic
/// tasks. Owned by the main loop behind an `Arc`.
pub struct ControllerContext {
    stop_flag: AtomicBool,
    latch_engaged: AtomicBool,
    sampling: AtomicBool,
    state: AtomicU8,
    config: RwLock<Config>,
    /// Serialises "check stop flag then assert an output" against
    /// "set stop flag then drop the outputs"
    output_gate: Mutex<()>,
}

impl ControllerContext {
    pub fn new(config: Config) -> Self {
        ControllerContext {
            stop_flag: AtomicBool::new(false),
            latch_engaged: AtomicBool::new(false),
            sampling: AtomicBool::new(false),
            state: AtomicU8::new(DoorState::Idle.code()),
            config: RwLock::new(config),
            output_gate: Mutex::new(()),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    /// Clears the stop flag. Only the re-initialization step calls this.
    pub(crate) fn clear_stop(&self) {
        self.stop_flag.store(false, Ordering::SeqCst);
    }

    /// Sets the stop flag and forces every motor output low, atomically with
    /// respect to [`ControllerContext::assert_output`]. Returns false if the
    /// flag was already set.
    pub(crate) fn engage_stop(&self, io: &dyn DigitalIo) -> bool {
        let _gate = self.gate();
        let first = !self.stop_flag.swap(true, Ordering::SeqCst);
        for output in Output::MOTOR {
            io.write(output, false);
        }
        self.sampling.store(false, Ordering::SeqCst);
        first
    }

    /// Drives `output` high unless a stop is pending. Returns whether the
    /// output was asserted.
    pub fn assert_output(&self, io: &dyn DigitalIo, output: Output) -> bool {
        let _gate = self.gate();
        if self.is_stopped() {
            return false;
        }
        io.write(output, true);
        true
    }

    pub fn release_output(&self, io: &dyn DigitalIo, output: Output) {
        io.write(output, false);
    }

    pub fn latch_engaged(&self) -> bool {
        self.latch_engaged.load(Ordering::SeqCst)
    }

    /// Returns the previous latch state
    pub(crate) fn set_latch(&self, engaged: bool) -> bool {
        self.latch_engaged.swap(engaged, Ordering::SeqCst)
    }

    pub fn arm_sampling(&self) {
        self.sampling.store(true, Ordering::SeqCst);
    }

    /// Arms the current sampler unless a stop is pending, under the same
    /// gate as [`ControllerContext::engage_stop`]. Returns whether it armed.
    pub fn arm_sampling_unless_stopped(&self) -> bool {
        let _gate = self.gate();
        if self.is_stopped() {
            return false;
        }
        self.sampling.store(true, Ordering::SeqCst);
        true
    }

    pub fn disarm_sampling(&self) {
        self.sampling.store(false, Ordering::SeqCst);
    }

    pub fn sampling_armed(&self) -> bool {
        self.sampling.load(Ordering::SeqCst)
    }

    pub fn state_code(&self) -> u8 {
        self.state.load(Ordering::SeqCst)
    }

    pub fn set_state_code(&self, code: u8) {
        self.state.store(code, Ordering::SeqCst);
    }

    /// Snapshot of the whole configuration
    pub fn config(&self) -> Config {
        *self.config.read().unwrap()
    }

    /// Swaps the whole configuration at once so readers never see a
    /// partially applied commit
    pub fn replace_config(&self, config: Config) {
        *self.config.write().unwrap() = config;
    }

    fn gate(&self) -> MutexGuard<'_, ()> {
        // a poisoned gate still orders the writes
        self.output_gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
