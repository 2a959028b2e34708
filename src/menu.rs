use std::sync::Arc;

use anyhow::Context;

use crate::config::{ConfigError, ConfigStore, Field, Group, Value};
use crate::context::ControllerContext;
use crate::display::Display;
use crate::io::{Board, Input};
use crate::rotary::{Direction, RotaryDecoder};

/// Seconds the encoder button must be held to enter the menu
pub const PROG_HOLD_S: u8 = 2;
/// Polling period of the encoder while the menu is shown, in ms
pub const POLL_MS: u32 = 5;
/// Wait after a coarse step while the encoder keeps turning, in ms
pub const HOLD_REPEAT_MS: u32 = 300;
/// Polls between two events of the same direction that count as a hold
const HOLD_WINDOW_POLLS: u32 = 20;
const COARSE_STEPS: i32 = 10;

const BACK: &str = "RETOUR";
const KEY_COL: u8 = 2;
const VALUE_COL: u8 = 12;

/// Windowed cursor over an ordered list.
///
/// The cursor moves inside the visible window first; the window only shifts
/// once the cursor sits on its edge and more items remain in that direction.
#[derive(Debug, Clone)]
pub struct ScrollableList<T> {
    items: Vec<T>,
    rows: usize,
    window: usize,
    line: usize,
    shift: usize,
}

impl<T> ScrollableList<T> {
    /// `rows` is the height of the display area, at least one line is used
    pub fn new(items: Vec<T>, rows: usize) -> Self {
        let rows = rows.max(1);
        ScrollableList {
            window: rows.min(items.len()),
            items,
            rows,
            line: 1,
            shift: 0,
        }
    }

    /// Visible items
    pub fn show(&self) -> &[T] {
        &self.items[self.shift..self.shift + self.window]
    }

    pub fn next(&mut self) -> &[T] {
        if self.line < self.window {
            self.line += 1;
        } else if self.shift + self.window < self.items.len() {
            self.shift += 1;
        }
        self.show()
    }

    pub fn previous(&mut self) -> &[T] {
        if self.line > 1 {
            self.line -= 1;
        } else if self.shift > 0 {
            self.shift -= 1;
        }
        self.show()
    }

    /// Cursor position inside the window, starting at 1
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn shift(&self) -> usize {
        self.shift
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Index of the item under the cursor
    pub fn index(&self) -> Option<usize> {
        let index = self.shift + self.line - 1;
        (index < self.items.len()).then_some(index)
    }

    pub fn selected(&self) -> Option<&T> {
        self.index().and_then(|i| self.items.get(i))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Replaces the items, keeping the cursor where it still fits
    pub fn update(&mut self, items: Vec<T>) {
        self.items = items;
        self.window = self.rows.min(self.items.len());
        self.shift = self.shift.min(self.items.len() - self.window);
        self.line = self.line.clamp(1, self.window.max(1));
    }

    pub fn reset(&mut self) {
        self.line = 1;
        self.shift = 0;
    }

    /// Changes the height of the window, keeping the same item selected
    pub fn resize(&mut self, rows: usize) {
        let index = self.index().unwrap_or(0);
        self.rows = rows.max(1);
        self.window = self.rows.min(self.items.len());
        if self.window == 0 {
            self.reset();
            return;
        }
        if index < self.shift {
            self.shift = index;
        } else if index >= self.shift + self.window {
            self.shift = index + 1 - self.window;
        }
        self.shift = self.shift.min(self.items.len() - self.window);
        self.line = index - self.shift + 1;
    }
}

/// Entries of the top level menu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Timers,
    Current,
    Temp,
    Parametres,
    Version,
    Exit,
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Feature::Timers,
        Feature::Current,
        Feature::Temp,
        Feature::Parametres,
        Feature::Version,
        Feature::Exit,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Feature::Timers => "MINUTERIE",
            Feature::Current => "COURANT",
            Feature::Temp => "TEMPERATURE",
            Feature::Parametres => "PARAMETRES",
            Feature::Version => "VERSION",
            Feature::Exit => "QUITTER",
        }
    }

    fn group(self) -> Option<Group> {
        match self {
            Feature::Timers => Some(Group::Timers),
            Feature::Current => Some(Group::Current),
            Feature::Temp => Some(Group::Temp),
            Feature::Parametres => Some(Group::Parametres),
            Feature::Version | Feature::Exit => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuEvent {
    /// Encoder turned; `held` when it keeps turning the same way
    Turn { direction: Direction, held: bool },
    /// Confirmed press of the encoder button
    Press,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuOutcome {
    Stay,
    Exit,
}

/// Keys and values of one parameter group, scrolled together
#[derive(Debug)]
struct GroupView {
    group: Group,
    keys: ScrollableList<&'static str>,
    values: ScrollableList<String>,
}

impl GroupView {
    fn new(group: Group, ctx: &ControllerContext, rows: usize) -> Self {
        GroupView {
            group,
            keys: ScrollableList::new(Self::keys(group), rows),
            values: ScrollableList::new(Self::values(group, ctx), rows),
        }
    }

    fn keys(group: Group) -> Vec<&'static str> {
        group
            .fields()
            .iter()
            .map(|f| f.key())
            .chain(std::iter::once(BACK))
            .collect()
    }

    fn values(group: Group, ctx: &ControllerContext) -> Vec<String> {
        let config = ctx.config();
        group
            .fields()
            .iter()
            .map(|&f| config.value(group, f).map(|v| v.to_string()).unwrap_or_default())
            .chain(std::iter::once(String::new()))
            .collect()
    }

    /// Re-reads every value from the configuration
    fn refresh(&mut self, ctx: &ControllerContext) {
        self.values.update(Self::values(self.group, ctx));
    }

    fn resize(&mut self, rows: usize) {
        self.keys.resize(rows);
        self.values.resize(rows);
    }

    fn next(&mut self) {
        self.keys.next();
        self.values.next();
    }

    fn previous(&mut self) {
        self.keys.previous();
        self.values.previous();
    }

    /// Field under the cursor, `None` on the back entry
    fn field(&self) -> Option<Field> {
        self.keys
            .index()
            .and_then(|i| self.group.fields().get(i).copied())
    }
}

#[derive(Debug)]
enum Mode {
    Features,
    Browse(GroupView),
    Edit {
        view: GroupView,
        field: Field,
        value: Value,
    },
}

/// On-device configuration menu
pub struct MenuController {
    ctx: Arc<ControllerContext>,
    board: Board,
    store: Box<dyn ConfigStore>,
    features: ScrollableList<Feature>,
    mode: Mode,
    rows: usize,
}

impl MenuController {
    pub fn new(ctx: Arc<ControllerContext>, board: Board, store: Box<dyn ConfigStore>) -> Self {
        let rows = usize::from(ctx.config().params.lcd_rows);
        MenuController {
            ctx,
            board,
            store,
            features: ScrollableList::new(Feature::ALL.to_vec(), rows),
            mode: Mode::Features,
            rows,
        }
    }

    /// Store the menu commits to
    pub fn store_mut(&mut self) -> &mut dyn ConfigStore {
        self.store.as_mut()
    }

    pub fn selected_feature(&self) -> Option<Feature> {
        self.features.selected().copied()
    }

    /// Field being edited, with its pending value
    pub fn editing(&self) -> Option<(Field, Value)> {
        match &self.mode {
            Mode::Edit { field, value, .. } => Some((*field, *value)),
            _ => None,
        }
    }

    /// Group shown, if any
    pub fn group(&self) -> Option<Group> {
        match &self.mode {
            Mode::Features => None,
            Mode::Browse(view) | Mode::Edit { view, .. } => Some(view.group),
        }
    }

    /// Waits while the encoder button stays pressed, sampling once a
    /// second. True once it was held for [`PROG_HOLD_S`] seconds.
    pub fn enter(&mut self) -> bool {
        let reads = self.ctx.config().params.button_reads;
        let mut held = 0;
        while held < PROG_HOLD_S {
            if self.ctx.is_stopped() || !self.board.confirm(Input::Select, reads) {
                return false;
            }
            held += 1;
            self.board.delay.delay_ms(1000);
        }
        log::info!("Entering configuration menu");
        self.rows = usize::from(self.ctx.config().params.lcd_rows);
        self.features = ScrollableList::new(Feature::ALL.to_vec(), self.rows);
        self.mode = Mode::Features;
        true
    }

    /// Polls the encoder and dispatches events until the menu is left or a
    /// stop is requested. Commit failures are reported and the menu stays.
    pub fn run(&mut self, rotary: &mut RotaryDecoder) {
        self.render();
        let reads = self.ctx.config().params.button_reads;
        // the press that opened the menu must be released first
        let mut was_pressed = true;
        let mut last = Direction::None;
        let mut since_last = u32::MAX;

        while !self.ctx.is_stopped() {
            let io = &self.board.io;
            let direction = rotary.sample(
                io.read(Input::Up),
                io.read(Input::Down),
                io.read(Input::Select),
            );
            let pressed = rotary.pressed() && self.board.confirm(Input::Select, reads);

            let event = if pressed && !was_pressed {
                Some(MenuEvent::Press)
            } else if direction != Direction::None {
                let held = direction == last && since_last <= HOLD_WINDOW_POLLS;
                last = direction;
                since_last = 0;
                Some(MenuEvent::Turn { direction, held })
            } else {
                since_last = since_last.saturating_add(1);
                None
            };
            was_pressed = pressed;

            let mut wait = POLL_MS;
            if let Some(event) = event {
                if matches!(event, MenuEvent::Turn { held: true, .. }) {
                    wait = HOLD_REPEAT_MS;
                }
                match self.handle(event) {
                    Ok(MenuOutcome::Exit) => return,
                    Ok(MenuOutcome::Stay) => {}
                    Err(e) => {
                        log::error!("Menu error: {:#}", e);
                        self.board.display.write_line_centered("ERREUR", 1);
                    }
                }
            }
            self.board.delay.delay_ms(wait);
        }
        log::info!("Menu interrupted by stop request");
    }

    /// Applies one encoder event
    pub fn handle(&mut self, event: MenuEvent) -> anyhow::Result<MenuOutcome> {
        let mode = std::mem::replace(&mut self.mode, Mode::Features);
        let mut result = Ok(());
        self.mode = match (mode, event) {
            (Mode::Features, MenuEvent::Turn { direction, .. }) => {
                match direction {
                    Direction::Cw => {
                        self.features.next();
                    }
                    Direction::Ccw => {
                        self.features.previous();
                    }
                    Direction::None => {}
                }
                Mode::Features
            }
            (Mode::Features, MenuEvent::Press) => match self.features.selected().copied() {
                Some(Feature::Exit) => {
                    log::info!("Leaving configuration menu");
                    self.board.display.clear();
                    return Ok(MenuOutcome::Exit);
                }
                Some(Feature::Version) => {
                    self.show_version();
                    return Ok(MenuOutcome::Stay);
                }
                Some(feature) => match feature.group() {
                    Some(group) => Mode::Browse(GroupView::new(group, &self.ctx, self.rows)),
                    None => Mode::Features,
                },
                None => Mode::Features,
            },
            (Mode::Browse(mut view), MenuEvent::Turn { direction, .. }) => {
                match direction {
                    Direction::Cw => view.next(),
                    Direction::Ccw => view.previous(),
                    Direction::None => {}
                }
                Mode::Browse(view)
            }
            (Mode::Browse(view), MenuEvent::Press) => match view.field() {
                None => Mode::Features,
                Some(field) => {
                    let value = self.ctx.config().value(view.group, field)?;
                    Mode::Edit { view, field, value }
                }
            },
            (Mode::Edit { view, field, value }, MenuEvent::Turn { direction, held }) => {
                let steps = direction.delta() * if held { COARSE_STEPS } else { 1 };
                let value = value.adjust(view.group.rule(field), steps);
                Mode::Edit { view, field, value }
            }
            (Mode::Edit { mut view, field, value }, MenuEvent::Press) => {
                result = self.commit(view.group, field, value);
                view.refresh(&self.ctx);
                let rows = usize::from(self.ctx.config().params.lcd_rows);
                if rows != self.rows {
                    self.rows = rows;
                    self.features.resize(rows);
                    view.resize(rows);
                }
                Mode::Browse(view)
            }
        };
        self.render();
        result.map(|_| MenuOutcome::Stay)
    }

    /// Merges the value into its group, persists the whole configuration and
    /// reads it back
    fn commit(&mut self, group: Group, field: Field, value: Value) -> anyhow::Result<()> {
        let mut config = self.ctx.config();
        config.apply(group, field, value)?;
        self.store
            .save(&config)
            .context("error saving configuration")?;
        let reloaded = self
            .store
            .load()
            .context("error reloading configuration")?;
        self.ctx.replace_config(reloaded);
        log::info!("{} set to {}", field.key(), value);
        if reloaded != config {
            return Err(ConfigError::Verify.into());
        }
        Ok(())
    }

    fn show_version(&self) {
        let display = &self.board.display;
        display.clear();
        display.write_line_centered("HARMONIE", 1);
        display.write_line_centered(&format!("V {}", env!("CARGO_PKG_VERSION")), 2);
    }

    fn render(&self) {
        let display = &self.board.display;
        display.clear();
        match &self.mode {
            Mode::Features => {
                for (row, feature) in (1u8..).zip(self.features.show()) {
                    if row == self.features.line() as u8 {
                        display.write_line(">>", row, 2);
                    }
                    display.write_line(feature.label(), row, 5);
                }
            }
            Mode::Browse(view) => render_view(display.as_ref(), view, None),
            Mode::Edit { view, field, value } => {
                render_view(display.as_ref(), view, Some(*value));
                if let Some(hint) = view.group.hint(*field) {
                    // last row, unless the cursor sits there
                    let row = if view.keys.line() == self.rows { 1 } else { self.rows };
                    if self.rows > 1 {
                        display.write_line_centered(hint, row as u8);
                    }
                }
            }
        }
    }
}

fn render_view(display: &dyn Display, view: &GroupView, editing: Option<Value>) {
    let rows = (1u8..).zip(view.keys.show().iter().zip(view.values.show()));
    for (row, (key, value)) in rows {
        let on_cursor = row == view.keys.line() as u8;
        if on_cursor {
            display.write_line(if editing.is_some() { "*" } else { ">" }, row, 1);
        }
        display.write_line(&key.to_uppercase(), row, KEY_COL);
        match editing {
            Some(pending) if on_cursor => display.write_line(&pending.to_string(), row, VALUE_COL),
            _ => display.write_line(value, row, VALUE_COL),
        }
    }
}
