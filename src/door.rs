use std::sync::Arc;

use crate::config::{Config, CounterSource, MidStopPin, Parametres};
use crate::context::ControllerContext;
use crate::io::{Board, Input, Output};
use crate::sensor;

const STATUS_ROW: u8 = 1;
const COUNTDOWN_ROW: u8 = 2;
const CURRENT_ROW: u8 = 3;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DoorError {
    #[error("invalid door state code {0:#04x}")]
    InvalidState(u8),
}

/// Phases of a door cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorState {
    /// Waiting for an open or close request
    Idle,
    /// Closing, waiting for the close limit
    Closing,
    /// Opening, waiting for the open limit
    OpenedBeforeMid,
    MidStop,
    /// Opening again after the mid-stop
    OpenedAfterMid,
    /// Unknown state, nothing moves until an external restart
    Fault,
}

impl DoorState {
    pub const FAULT_CODE: u8 = 0xFF;

    pub fn code(self) -> u8 {
        match self {
            DoorState::Idle => 0,
            DoorState::Closing => 1,
            DoorState::OpenedBeforeMid => 2,
            DoorState::MidStop => 3,
            DoorState::OpenedAfterMid => 4,
            DoorState::Fault => Self::FAULT_CODE,
        }
    }

    /// Any code outside the table decodes to [`DoorState::Fault`]
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => DoorState::Idle,
            1 => DoorState::Closing,
            2 => DoorState::OpenedBeforeMid,
            3 => DoorState::MidStop,
            4 => DoorState::OpenedAfterMid,
            _ => DoorState::Fault,
        }
    }
}

/// Direction a motor pulse moves the door
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Motion {
    Open,
    Close,
}

impl Motion {
    fn output(self) -> Output {
        match self {
            Motion::Open => Output::Open,
            Motion::Close => Output::Close,
        }
    }

    /// Limit switch that ends this motion
    fn limit(self) -> Input {
        match self {
            Motion::Open => Input::OpenLimit,
            Motion::Close => Input::CloseLimit,
        }
    }

    fn message(self) -> &'static str {
        match self {
            Motion::Open => "EN OUVERTURE",
            Motion::Close => "EN FERMETURE",
        }
    }
}

/// Door sequencer.
///
/// Each [`DoorController::step`] confirms the input the current state waits
/// for and, once confirmed, runs the countdown and the motor pulses of that
/// transition. A missing limit switch keeps the door in its state forever.
pub struct DoorController {
    ctx: Arc<ControllerContext>,
    board: Board,
    cycles: u32,
}

impl DoorController {
    pub fn new(ctx: Arc<ControllerContext>, board: Board) -> Self {
        DoorController {
            ctx,
            board,
            cycles: 0,
        }
    }

    pub fn state(&self) -> DoorState {
        DoorState::from_code(self.ctx.state_code())
    }

    /// Completed close-to-open cycles since the last re-initialization
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    /// Back to idle with a fresh cycle count. A fault is kept.
    pub fn reset(&mut self) {
        if self.state() == DoorState::Fault {
            log::error!("Door faulted, restart required");
            return;
        }
        self.cycles = 0;
        self.ctx.set_state_code(DoorState::Idle.code());
    }

    /// Steps the sequencer until a stop is requested
    pub fn run(&mut self) -> Result<(), DoorError> {
        log::info!("Door sequence started");
        while !self.ctx.is_stopped() {
            self.step()?;
        }
        log::info!("Door sequence stopped in {:?}", self.state());
        Ok(())
    }

    /// One pass of the sequencer, returns the state it ends in
    pub fn step(&mut self) -> Result<DoorState, DoorError> {
        let code = self.ctx.state_code();
        let state = DoorState::from_code(code);
        if state == DoorState::Fault {
            self.fault(code);
            return Err(DoorError::InvalidState(code));
        }

        let config = self.ctx.config().normalized();
        let params = config.params;
        let next = match state {
            DoorState::Idle => {
                if self.confirm(Input::Close, &params) {
                    self.drive(Motion::Close, &params);
                    DoorState::Closing
                } else if self.confirm(Input::Open, &params) {
                    self.drive(Motion::Open, &params);
                    DoorState::OpenedBeforeMid
                } else {
                    state
                }
            }
            DoorState::Closing => {
                if self.confirm(Input::CloseLimit, &params) {
                    self.ctx.disarm_sampling();
                    self.cycles = self.cycles.wrapping_add(1);
                    log::info!("Door closed, cycle {}", self.cycles);
                    self.status("PORTE FERMEE");
                    if config.temp.status.is_active() {
                        sensor::show_temperature(&self.board, &config.temp);
                    }
                    self.countdown(config.timers.cls, "OUVERTURE:", None, &params);
                    self.drive(Motion::Open, &params);
                    if params.counter == CounterSource::CloseLimit {
                        self.pulse(Output::Counter, &params);
                    }
                    DoorState::OpenedBeforeMid
                } else {
                    state
                }
            }
            DoorState::OpenedBeforeMid => {
                if self.confirm(Input::OpenLimit, &params) {
                    self.ctx.disarm_sampling();
                    self.status("PORTE OUVERTE");
                    self.countdown(config.timers.opn1, "FERMETURE:", None, &params);
                    self.close_after_open(&params);
                    if self.mid_stop_due(&config) {
                        DoorState::MidStop
                    } else {
                        DoorState::Closing
                    }
                } else {
                    state
                }
            }
            DoorState::MidStop => {
                self.ctx.disarm_sampling();
                self.status("MI-ARRET");
                self.countdown(
                    config.timers.mid,
                    "OUVERTURE:",
                    Some(Input::CloseLimit),
                    &params,
                );
                match params.mid_stop_pin {
                    MidStopPin::Open => self.drive(Motion::Open, &params),
                    MidStopPin::Counter => {
                        self.pulse(Output::Counter, &params);
                    }
                }
                DoorState::OpenedAfterMid
            }
            DoorState::OpenedAfterMid => {
                if self.confirm(Input::OpenLimit, &params) {
                    self.ctx.disarm_sampling();
                    self.status("PORTE OUVERTE");
                    self.countdown(config.timers.opn2, "FERMETURE:", None, &params);
                    self.close_after_open(&params);
                    DoorState::Closing
                } else {
                    state
                }
            }
            DoorState::Fault => unreachable!("handled above"),
        };

        if self.ctx.is_stopped() {
            // suspended until the re-initialization
            return Ok(state);
        }
        if next != state {
            log::debug!("{:?} -> {:?}", state, next);
            self.ctx.set_state_code(next.code());
        }
        Ok(next)
    }

    /// Mid-stop engages every n-th completed cycle, never when its timer
    /// is zero
    fn mid_stop_due(&self, config: &Config) -> bool {
        let every = u32::from(config.params.mid_stop_every.max(1));
        config.timers.mid > 0 && self.cycles > 0 && self.cycles % every == 0
    }

    fn close_after_open(&self, params: &Parametres) {
        self.drive(Motion::Close, params);
        if params.counter == CounterSource::OpenLimit {
            self.pulse(Output::Counter, params);
        }
    }

    fn confirm(&self, input: Input, params: &Parametres) -> bool {
        self.board.confirm(input, params.button_reads)
    }

    /// Pulses a motor output unless the door already sits on the matching
    /// limit, then samples the current while it moves
    fn drive(&self, motion: Motion, params: &Parametres) {
        let limit = motion.limit();
        if self.board.io.read(limit) {
            log::info!("{:?} already reached, {:?} not driven", limit, motion);
            return;
        }
        // a stop may land during the pulse, sampling must not outlive it
        if self.pulse(motion.output(), params) && self.ctx.arm_sampling_unless_stopped() {
            self.board.display.clear_line(COUNTDOWN_ROW);
            self.status(motion.message());
        }
    }

    /// Holds `output` high for the configured press duration. False if a
    /// stop prevented it.
    fn pulse(&self, output: Output, params: &Parametres) -> bool {
        if !self.ctx.assert_output(&*self.board.io, output) {
            log::warn!("{:?} not driven, stop pending", output);
            return false;
        }
        self.board.delay.delay_ms(params.button_hold_ms.into());
        self.ctx.release_output(&*self.board.io, output);
        true
    }

    /// Counts down one second at a time. Ends early on a stop request or
    /// once `abort` is confirmed.
    fn countdown(&self, seconds: u16, message: &str, abort: Option<Input>, params: &Parametres) {
        self.ctx.disarm_sampling();
        log::debug!("Countdown {} {}s", message, seconds);
        for remaining in (1..=seconds).rev() {
            self.board
                .display
                .write_line_centered(&format!("{}{:>3}", message, remaining), COUNTDOWN_ROW);
            if self.ctx.is_stopped() {
                break;
            }
            if abort.map_or(false, |input| self.confirm(input, params)) {
                log::info!("Countdown interrupted by {:?}", abort);
                break;
            }
            self.board.delay.delay_ms(1000);
        }
    }

    fn status(&self, message: &str) {
        let display = &self.board.display;
        display.clear_line(CURRENT_ROW);
        display.write_line_centered(message, STATUS_ROW);
    }

    fn fault(&self, code: u8) {
        for output in Output::MOTOR {
            self.ctx.release_output(&*self.board.io, output);
        }
        self.ctx.disarm_sampling();
        self.ctx.set_state_code(DoorState::FAULT_CODE);
        log::error!("Invalid door state {:#04x}", code);
        self.board.display.clear();
        self.board.display.write_line_centered("ERREUR", STATUS_ROW);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timers;
    use crate::display::FrameBuffer;
    use crate::io::DigitalIo;
    use crate::testing::{board, FakeDelay, FakeIo};

    struct Rig {
        door: DoorController,
        ctx: Arc<ControllerContext>,
        io: Arc<FakeIo>,
        lcd: Arc<FrameBuffer>,
        delay: Arc<FakeDelay>,
    }

    fn rig(timers: Timers, every: u16) -> Rig {
        let mut config = Config::default();
        config.timers = timers;
        config.params.mid_stop_every = every;
        config.params.button_hold_ms = 100;
        config.temp.status = crate::config::Status::Inactive;
        let ctx = Arc::new(ControllerContext::new(config));
        let (board, io, lcd, delay) = board();
        Rig {
            door: DoorController::new(ctx.clone(), board),
            ctx,
            io,
            lcd,
            delay,
        }
    }

    impl Rig {
        /// Confirms `input` for one step and returns the new state plus the
        /// countdown seconds spent in it
        fn step_with(&mut self, input: Option<Input>) -> (DoorState, usize) {
            if let Some(input) = input {
                self.io.set(input, true);
            }
            let before = self.delay.count(1000);
            let state = self.door.step().unwrap();
            if let Some(input) = input {
                self.io.set(input, false);
            }
            (state, self.delay.count(1000) - before)
        }

        /// Runs one full cycle from Closing, returns whether it went
        /// through the mid-stop
        fn cycle(&mut self) -> bool {
            assert_eq!(self.step_with(Some(Input::CloseLimit)).0, DoorState::OpenedBeforeMid);
            match self.step_with(Some(Input::OpenLimit)).0 {
                DoorState::MidStop => {
                    assert_eq!(self.step_with(None).0, DoorState::OpenedAfterMid);
                    assert_eq!(self.step_with(Some(Input::OpenLimit)).0, DoorState::Closing);
                    true
                }
                DoorState::Closing => false,
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    fn timers(opn1: u16, cls: u16, mid: u16, opn2: u16) -> Timers {
        Timers {
            opn1,
            cls,
            mid,
            opn2,
        }
    }

    #[test]
    fn full_cycle_with_mid_stop() {
        let mut rig = rig(timers(3, 2, 4, 2), 1);
        assert_eq!(rig.step_with(None), (DoorState::Idle, 0));
        assert_eq!(rig.step_with(Some(Input::Close)), (DoorState::Closing, 0));
        assert!(rig.io.pulsed(Output::Close));

        assert_eq!(rig.step_with(Some(Input::CloseLimit)), (DoorState::OpenedBeforeMid, 2));
        assert_eq!(rig.door.cycles(), 1);
        assert!(rig.io.pulsed(Output::Open));
        assert!(rig.lcd.contains("EN OUVERTURE"));

        assert_eq!(rig.step_with(Some(Input::OpenLimit)), (DoorState::MidStop, 3));
        assert_eq!(rig.step_with(None), (DoorState::OpenedAfterMid, 4));
        assert_eq!(rig.step_with(Some(Input::OpenLimit)), (DoorState::Closing, 2));
        assert_eq!(rig.ctx.state_code(), DoorState::Closing.code());
    }

    #[test]
    fn mid_zero_never_stops_midway() {
        let mut rig = rig(timers(1, 1, 0, 5), 1);
        rig.step_with(Some(Input::Close));
        for _ in 0..5 {
            assert!(!rig.cycle());
        }
    }

    #[test]
    fn mid_stop_on_even_cycles() {
        let mut rig = rig(timers(1, 1, 1, 1), 2);
        rig.step_with(Some(Input::Close));
        let visits: Vec<bool> = (0..6).map(|_| rig.cycle()).collect();
        assert_eq!(visits, [false, true, false, true, false, true]);
    }

    #[test]
    fn waits_for_the_limit_switch() {
        let mut rig = rig(timers(1, 1, 1, 1), 1);
        rig.step_with(Some(Input::Open));
        for _ in 0..10 {
            assert_eq!(rig.step_with(None).0, DoorState::OpenedBeforeMid);
        }
    }

    #[test]
    fn no_pulse_when_already_at_limit() {
        let mut rig = rig(timers(1, 1, 1, 1), 1);
        rig.io.set(Input::OpenLimit, true);
        assert_eq!(rig.step_with(Some(Input::Open)).0, DoorState::OpenedBeforeMid);
        assert!(!rig.io.pulsed(Output::Open));
    }

    #[test]
    fn counter_follows_the_configured_limit() {
        let mut rig = rig(timers(1, 1, 0, 0), 1);
        let mut config = rig.ctx.config();
        config.params.counter = CounterSource::OpenLimit;
        rig.ctx.replace_config(config);
        rig.step_with(Some(Input::Close));
        rig.step_with(Some(Input::CloseLimit));
        assert!(!rig.io.pulsed(Output::Counter));
        rig.step_with(Some(Input::OpenLimit));
        assert!(rig.io.pulsed(Output::Counter));
    }

    #[test]
    fn mid_stop_can_drive_the_counter() {
        let mut rig = rig(timers(1, 1, 2, 1), 1);
        let mut config = rig.ctx.config();
        config.params.mid_stop_pin = MidStopPin::Counter;
        rig.ctx.replace_config(config);
        rig.ctx.set_state_code(DoorState::MidStop.code());
        rig.step_with(None);
        assert!(rig.io.pulsed(Output::Counter));
        assert!(!rig.io.pulsed(Output::Open));
    }

    #[test]
    fn close_limit_cuts_the_mid_stop_short() {
        let mut rig = rig(timers(1, 1, 9, 1), 1);
        rig.ctx.set_state_code(DoorState::MidStop.code());
        let io = rig.io.clone();
        rig.delay.on_delay(move |elapsed| {
            if elapsed >= 2000 {
                io.set(Input::CloseLimit, true);
            }
        });
        assert_eq!(rig.step_with(None), (DoorState::OpenedAfterMid, 2));
    }

    #[test]
    fn close_limit_glitch_does_not_end_the_mid_stop() {
        let mut rig = rig(timers(1, 1, 3, 1), 1);
        let mut config = rig.ctx.config();
        config.params.button_reads = 3;
        rig.ctx.replace_config(config);
        rig.ctx.set_state_code(DoorState::MidStop.code());
        rig.io.set_sequence(Input::CloseLimit, &[true, false]);
        assert_eq!(rig.step_with(None), (DoorState::OpenedAfterMid, 3));
    }

    #[test]
    fn stop_during_pulse_keeps_sampling_off() {
        let mut rig = rig(timers(1, 1, 1, 1), 1);
        let ctx = rig.ctx.clone();
        let io = rig.io.clone();
        rig.delay.on_delay(move |_| {
            if io.level(Output::Close) {
                ctx.engage_stop(&*io);
            }
        });
        assert_eq!(rig.step_with(Some(Input::Close)).0, DoorState::Idle);
        assert!(rig.ctx.is_stopped());
        assert!(!rig.ctx.sampling_armed());
        assert!(!rig.io.level(Output::Close));
        assert!(!rig.lcd.contains("EN FERMETURE"));
    }

    #[test]
    fn stop_blocks_every_output_until_reset() {
        let mut rig = rig(timers(5, 5, 5, 5), 1);
        rig.step_with(Some(Input::Close));

        let ctx = rig.ctx.clone();
        let io = rig.io.clone();
        let io_cb = io.clone();
        rig.delay.on_delay(move |elapsed| {
            if elapsed >= 1500 {
                ctx.engage_stop(&*io_cb);
            }
        });
        let mark = io.writes().len();
        assert_eq!(rig.step_with(Some(Input::CloseLimit)).0, DoorState::Closing);
        assert!(rig.ctx.is_stopped());

        // the door loop is suspended, nothing goes active
        rig.door.run().unwrap();
        for input in [Input::Open, Input::Close, Input::OpenLimit, Input::CloseLimit] {
            rig.step_with(Some(input));
        }
        assert!(io.writes()[mark..]
            .iter()
            .all(|&(output, level)| !level || output == Output::Stop));

        rig.delay.clear_hook();
        rig.ctx.clear_stop();
        rig.door.reset();
        assert_eq!(rig.door.state(), DoorState::Idle);
        assert_eq!(rig.door.cycles(), 0);
        rig.step_with(Some(Input::Open));
        assert!(rig.io.pulsed(Output::Open));
    }

    #[test]
    fn corrupted_state_is_fatal() {
        let mut rig = rig(timers(1, 1, 1, 1), 1);
        rig.io.write(Output::Open, true);
        rig.ctx.set_state_code(9);
        assert_eq!(rig.door.step(), Err(DoorError::InvalidState(9)));
        assert_eq!(rig.door.state(), DoorState::Fault);
        assert!(!rig.io.level(Output::Open));
        assert!(rig.lcd.contains("ERREUR"));

        rig.door.reset();
        assert_eq!(
            rig.door.step(),
            Err(DoorError::InvalidState(DoorState::FAULT_CODE))
        );
    }

    #[test]
    fn state_codes_round_trip() {
        for state in [
            DoorState::Idle,
            DoorState::Closing,
            DoorState::OpenedBeforeMid,
            DoorState::MidStop,
            DoorState::OpenedAfterMid,
            DoorState::Fault,
        ] {
            assert_eq!(DoorState::from_code(state.code()), state);
        }
        assert_eq!(DoorState::from_code(5), DoorState::Fault);
    }
}
