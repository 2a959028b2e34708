use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::Duration;

use crate::context::ControllerContext;
use crate::io::{debounced_read, Board, Input, Output};
use crate::task::PeriodicTask;

/// Period of the release check
pub const RELEASE_PERIOD: Duration = Duration::from_millis(50);
const EVENT_QUEUE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopEvent {
    Engaged,
    Released,
}

/// Emergency stop latch.
///
/// [`StopLatch::on_edge`] runs on every rising edge of the stop button and
/// may preempt the main loop at any point. Once engaged, the stop flag stays
/// set after the button is released: only the re-initialization of the
/// main loop clears it.
///
/// Usage:
/// ```ignore
/// let (latch, events) = StopLatch::new(ctx.clone(), board.clone());
/// let _release = latch.spawn_release_check()?;
/// // from the edge interrupt
/// latch.on_edge();
/// for event in events.try_iter() {
///     // react in the main loop
/// }
/// ```
#[derive(Clone)]
pub struct StopLatch {
    ctx: Arc<ControllerContext>,
    board: Board,
    events: SyncSender<StopEvent>,
}

impl StopLatch {
    pub fn new(ctx: Arc<ControllerContext>, board: Board) -> (Self, Receiver<StopEvent>) {
        let (events, events_rx) = mpsc::sync_channel(EVENT_QUEUE);
        (StopLatch { ctx, board, events }, events_rx)
    }

    /// Drives the stop output to its idle level
    pub fn reset_output(&self) {
        let polarity = self.ctx.config().params.stop_out;
        self.board.io.write(Output::Stop, polarity.idle_level());
    }

    /// Handles a rising edge. Returns true if the latch was engaged by this
    /// edge.
    pub fn on_edge(&self) -> bool {
        let params = self.ctx.config().params;
        let io = &*self.board.io;
        if !debounced_read(io, &*self.board.delay, Input::Stop, params.button_reads) {
            log::debug!("Stop edge rejected as noise");
            return false;
        }
        if self.ctx.set_latch(true) {
            return false;
        }
        self.ctx.engage_stop(io);
        io.write(Output::Stop, params.stop_out.active_level());
        log::warn!("Emergency stop engaged");
        self.notify(StopEvent::Engaged);
        true
    }

    /// Releases the latch once the button reads inactive again. The stop
    /// flag is left set. Returns true when the latch was released.
    pub fn check_release(&self) -> bool {
        if !self.ctx.latch_engaged() || self.board.io.read(Input::Stop) {
            return false;
        }
        let polarity = self.ctx.config().params.stop_out;
        self.board.io.write(Output::Stop, polarity.idle_level());
        self.ctx.set_latch(false);
        log::info!("Stop button released");
        self.notify(StopEvent::Released);
        true
    }

    /// Starts the periodic release check
    pub fn spawn_release_check(&self) -> anyhow::Result<PeriodicTask> {
        let latch = self.clone();
        PeriodicTask::spawn("stop-release", RELEASE_PERIOD, move || {
            latch.check_release();
        })
    }

    fn notify(&self, event: StopEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::warn!("Stop event queue full, dropping {:?}", event),
            Err(TrySendError::Disconnected(_)) => log::error!("Stop event receiver gone"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, StopPolarity};
    use crate::io::DigitalIo;
    use crate::testing::board;

    fn latch(config: Config) -> (StopLatch, Receiver<StopEvent>, Arc<crate::testing::FakeIo>) {
        let ctx = Arc::new(ControllerContext::new(config));
        let (board, io, _lcd, _delay) = board();
        let (latch, events) = StopLatch::new(ctx, board);
        (latch, events, io)
    }

    #[test]
    fn confirmed_edge_engages_once() {
        let mut config = Config::default();
        config.params.button_reads = 3;
        let (latch, events, io) = latch(config);
        io.write(Output::Open, true);
        io.set(Input::Stop, true);

        assert!(latch.on_edge());
        assert!(latch.ctx.is_stopped());
        assert!(latch.ctx.latch_engaged());
        assert!(!io.level(Output::Open));
        assert!(io.level(Output::Stop));
        assert_eq!(events.try_recv(), Ok(StopEvent::Engaged));

        assert!(!latch.on_edge());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn noisy_edge_is_ignored() {
        let mut config = Config::default();
        config.params.button_reads = 3;
        let (latch, events, io) = latch(config);
        io.set_sequence(Input::Stop, &[true, true, false]);

        assert!(!latch.on_edge());
        assert!(!latch.ctx.is_stopped());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn release_keeps_the_stop_flag() {
        let (latch, events, io) = latch(Config::default());
        io.set(Input::Stop, true);
        latch.on_edge();
        // still held
        assert!(!latch.check_release());

        io.set(Input::Stop, false);
        assert!(latch.check_release());
        assert!(!io.level(Output::Stop));
        assert!(!latch.ctx.latch_engaged());
        assert!(latch.ctx.is_stopped());
        assert_eq!(
            events.try_iter().collect::<Vec<_>>(),
            vec![StopEvent::Engaged, StopEvent::Released]
        );
        assert!(!latch.check_release());
    }

    #[test]
    fn normally_closed_output_is_inverted() {
        let mut config = Config::default();
        config.params.stop_out = StopPolarity::NormallyClosed;
        let (latch, _events, io) = latch(config);
        latch.reset_output();
        assert!(io.level(Output::Stop));

        io.set(Input::Stop, true);
        latch.on_edge();
        assert!(!io.level(Output::Stop));

        io.set(Input::Stop, false);
        latch.check_release();
        assert!(io.level(Output::Stop));
    }
}
