//! Half-step quadrature decoding of the menu encoder.
//!
//! The decoder follows the two encoder lines through a six state automaton.
//! A direction is reported once the lines settle on a rest position
//! (`00` or `11`) after a complete, legal half detent. Contact bounce walks
//! back to a start state without reporting anything, so no time based
//! debounce is applied to the quadrature lines.

const DIR_CW: u8 = 0x10;
const DIR_CCW: u8 = 0x20;
const DIR_MASK: u8 = 0x30;
const STATE_MASK: u8 = 0x07;

const START: u8 = 0x0;
const CCW_BEGIN: u8 = 0x1;
const CW_BEGIN: u8 = 0x2;
const START_MID: u8 = 0x3;
const CW_BEGIN_MID: u8 = 0x4;
const CCW_BEGIN_MID: u8 = 0x5;

/// Next state indexed by `[state][clk << 1 | dt]`
const HALF_STEP: [[u8; 4]; 6] = [
    // START
    [START_MID, CW_BEGIN, CCW_BEGIN, START],
    // CCW_BEGIN
    [START_MID | DIR_CCW, START, CCW_BEGIN, START],
    // CW_BEGIN
    [START_MID | DIR_CW, CW_BEGIN, START, START],
    // START_MID
    [START_MID, CCW_BEGIN_MID, CW_BEGIN_MID, START],
    // CW_BEGIN_MID
    [START_MID, START_MID, CW_BEGIN_MID, START | DIR_CW],
    // CCW_BEGIN_MID
    [START_MID, CCW_BEGIN_MID, START_MID, START | DIR_CCW],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    None,
    Cw,
    Ccw,
}

impl Direction {
    /// +1, -1 or 0
    pub fn delta(self) -> i32 {
        match self {
            Direction::None => 0,
            Direction::Cw => 1,
            Direction::Ccw => -1,
        }
    }
}

#[derive(Debug)]
pub struct RotaryDecoder {
    state: u8,
    last: Direction,
    pressed: bool,
}

impl Default for RotaryDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RotaryDecoder {
    pub fn new() -> Self {
        RotaryDecoder {
            state: START,
            last: Direction::None,
            pressed: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Feeds one sample of the two quadrature lines
    pub fn step(&mut self, clk: bool, dt: bool) -> Direction {
        let row = usize::from(self.state & STATE_MASK);
        // unreachable states fall back to the start row
        let row = HALF_STEP.get(row).unwrap_or(&HALF_STEP[0]);
        let sample = usize::from(clk) << 1 | usize::from(dt);
        self.state = row[sample];

        let direction = match self.state & DIR_MASK {
            DIR_CW => Direction::Cw,
            DIR_CCW => Direction::Ccw,
            _ => Direction::None,
        };
        if direction != Direction::None {
            self.last = direction;
        }
        direction
    }

    /// Samples the lines and the push button at once
    pub fn sample(&mut self, clk: bool, dt: bool, sw: bool) -> Direction {
        self.pressed = sw;
        self.step(clk, dt)
    }

    /// Raw level of the push button at the last sample, not debounced
    pub fn pressed(&self) -> bool {
        self.pressed
    }

    /// Last direction emitted since power-on
    pub fn last(&self) -> Direction {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(decoder: &mut RotaryDecoder, samples: &[(bool, bool)]) -> Vec<Direction> {
        samples
            .iter()
            .map(|&(clk, dt)| decoder.step(clk, dt))
            .filter(|d| *d != Direction::None)
            .collect()
    }

    // one full detent cycle, starting and ending with both lines high
    const CW: [(bool, bool); 4] = [(false, true), (false, false), (true, false), (true, true)];
    const CCW: [(bool, bool); 4] = [(true, false), (false, false), (false, true), (true, true)];

    #[test]
    fn one_event_per_half_detent() {
        let mut decoder = RotaryDecoder::new();
        assert_eq!(feed(&mut decoder, &CW), vec![Direction::Cw, Direction::Cw]);
        assert_eq!(feed(&mut decoder, &CCW), vec![Direction::Ccw, Direction::Ccw]);
        assert_eq!(decoder.last(), Direction::Ccw);
    }

    #[test]
    fn repeated_samples_do_not_repeat_events() {
        let mut decoder = RotaryDecoder::new();
        let slow = [
            (false, true),
            (false, true),
            (false, false),
            (false, false),
            (false, false),
        ];
        assert_eq!(feed(&mut decoder, &slow), vec![Direction::Cw]);
    }

    #[test]
    fn bounce_is_rejected() {
        let mut decoder = RotaryDecoder::new();
        let bounce = [(false, true), (true, true), (true, false), (true, true)];
        assert!(feed(&mut decoder, &bounce).is_empty());

        // from the middle rest position
        feed(&mut decoder, &[(false, true), (false, false)]);
        let bounce_mid = [(true, false), (false, false), (false, true), (false, false)];
        assert!(feed(&mut decoder, &bounce_mid).is_empty());
    }

    #[test]
    fn corrupted_state_restarts() {
        let mut decoder = RotaryDecoder::new();
        decoder.state = 0x07;
        assert_eq!(decoder.step(true, true), Direction::None);
        assert_eq!(feed(&mut decoder, &CW).len(), 2);
    }

    #[test]
    fn press_is_a_plain_level() {
        let mut decoder = RotaryDecoder::new();
        decoder.sample(true, true, true);
        assert!(decoder.pressed());
        decoder.sample(true, true, false);
        assert!(!decoder.pressed());
    }
}
