use std::sync::mpsc::Receiver;
use std::sync::Arc;

use crate::config::{self, Config, ConfigStore};
use crate::context::ControllerContext;
use crate::door::{DoorController, DoorState};
use crate::io::{Board, Input, Output};
use crate::menu::MenuController;
use crate::rotary::RotaryDecoder;
use crate::sensor;
use crate::stop::{StopEvent, StopLatch};
use crate::task::PeriodicTask;

/// Idle polling period of the main loop, in ms
const IDLE_POLL_MS: u32 = 50;
const WELCOME_MS: u32 = 2000;

/// The operator: door sequencer and configuration menu taking turns on one
/// board, with the stop latch able to interrupt either.
pub struct Harmonie {
    ctx: Arc<ControllerContext>,
    board: Board,
    door: DoorController,
    menu: MenuController,
    rotary: RotaryDecoder,
    latch: StopLatch,
    events: Receiver<StopEvent>,
    tasks: Vec<PeriodicTask>,
    running: bool,
}

impl Harmonie {
    /// Loads the configuration (writing the defaults if none is usable) and
    /// runs the first initialization
    pub fn boot(board: Board, mut store: Box<dyn ConfigStore>) -> anyhow::Result<Self> {
        let config = config::load_or_default(store.as_mut())?;
        Ok(Self::new(board, config, store))
    }

    /// Runs the first initialization with an already loaded configuration,
    /// for boards whose display was sized from it
    pub fn new(board: Board, config: Config, store: Box<dyn ConfigStore>) -> Self {
        let ctx = Arc::new(ControllerContext::new(config));
        let (latch, events) = StopLatch::new(ctx.clone(), board.clone());
        let mut app = Harmonie {
            door: DoorController::new(ctx.clone(), board.clone()),
            menu: MenuController::new(ctx.clone(), board.clone(), store),
            rotary: RotaryDecoder::new(),
            ctx,
            board,
            latch,
            events,
            tasks: Vec::new(),
            running: false,
        };
        app.initialize();
        app
    }

    pub fn context(&self) -> &Arc<ControllerContext> {
        &self.ctx
    }

    /// Handle for the stop edge interrupt
    pub fn stop_latch(&self) -> StopLatch {
        self.latch.clone()
    }

    /// Starts the release check and the current sampler
    pub fn start_tasks(&mut self) -> anyhow::Result<()> {
        self.tasks.push(self.latch.spawn_release_check()?);
        self.tasks
            .push(sensor::spawn_current_sampler(self.ctx.clone(), self.board.clone())?);
        Ok(())
    }

    /// Brings everything back to the idle state: stop flag cleared, outputs
    /// off, door idle, welcome screen and timer summary shown
    pub fn initialize(&mut self) {
        self.ctx.clear_stop();
        for output in Output::MOTOR {
            self.ctx.release_output(&*self.board.io, output);
        }
        let config = self.ctx.config().normalized();
        self.ctx.replace_config(config);
        self.ctx.disarm_sampling();
        self.latch.reset_output();
        self.door.reset();
        self.rotary.reset();
        self.running = false;

        let display = &self.board.display;
        display.clear();
        display.write_line_centered(&format!("HARMONIE V {}", env!("CARGO_PKG_VERSION")), 1);
        display.write_line_centered("BIENVENUE", 2);
        self.board.delay.delay_ms(WELCOME_MS);
        self.show_timers();
        log::info!("Initialized, door {:?}", self.door.state());
    }

    /// One turn of the main loop. Only a faulted door is an error.
    pub fn poll(&mut self) -> anyhow::Result<()> {
        for event in self.events.try_iter() {
            match event {
                StopEvent::Engaged => {
                    self.board.display.clear();
                    self.board.display.write_line_centered("ARRET", 1);
                }
                StopEvent::Released => log::info!("Waiting for re-initialization"),
            }
        }

        if self.ctx.is_stopped() {
            self.running = false;
            if self.ctx.latch_engaged() {
                self.board.delay.delay_ms(IDLE_POLL_MS);
            } else {
                self.initialize();
            }
            return Ok(());
        }

        if self.running {
            self.door.step()?;
            return Ok(());
        }

        let reads = self.ctx.config().params.button_reads;
        if self.board.confirm(Input::Close, reads) || self.board.confirm(Input::Open, reads) {
            log::info!("Motion requested, starting door sequence");
            self.running = true;
        } else if self.board.io.read(Input::Select) && self.menu.enter() {
            self.rotary.reset();
            self.menu.run(&mut self.rotary);
            if !self.ctx.is_stopped() {
                self.show_timers();
            }
        } else {
            self.board.delay.delay_ms(IDLE_POLL_MS);
        }
        Ok(())
    }

    /// Runs the main loop. Returns only on a faulted door.
    pub fn run(&mut self) -> anyhow::Result<()> {
        loop {
            self.poll()?;
        }
    }

    pub fn door_state(&self) -> DoorState {
        self.door.state()
    }

    fn show_timers(&self) {
        let timers = self.ctx.config().timers;
        let display = &self.board.display;
        display.clear();
        display.write_line_centered(&format!("Cls:{:>3},Opn1:{:>3}", timers.cls, timers.opn1), 1);
        display.write_line_centered(&format!("Mid:{:>3},Opn2:{:>3}", timers.mid, timers.opn2), 2);
    }
}
