use std::fmt;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Largest value a countdown timer can hold, in seconds
pub const TIMER_MAX: u16 = 999;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{0:?} has no field {1:?}")]
    NoSuchField(Group, Field),
    #[error("value {1} does not fit field {0:?}")]
    WrongKind(Field, Value),
    #[error("configuration read back differs from what was written")]
    Verify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Active,
    Inactive,
}

impl Status {
    pub fn is_active(self) -> bool {
        self == Status::Active
    }
}

/// Countdowns of each phase, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timers {
    pub opn1: u16,
    pub cls: u16,
    pub mid: u16,
    pub opn2: u16,
}

/// Linear calibration of an analog sensor.
/// `factor` is the sensor sensitivity in mV per unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub status: Status,
    pub samples: u8,
    pub v_max: f32,
    pub v0_ref: f32,
    pub factor: f32,
}

/// Which limit switch pulses the cycle counter output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterSource {
    OpenLimit,
    CloseLimit,
    Inactive,
}

/// Output pulsed when leaving the mid-stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MidStopPin {
    Open,
    Counter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopPolarity {
    NormallyOpen,
    NormallyClosed,
}

impl StopPolarity {
    /// Level of the stop output while the latch is engaged
    pub fn active_level(self) -> bool {
        self == StopPolarity::NormallyOpen
    }

    pub fn idle_level(self) -> bool {
        !self.active_level()
    }
}

/// Wiring and operating options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parametres {
    pub lcd_rows: u8,
    pub lcd_cols: u8,
    pub counter: CounterSource,
    /// How long a motor output is held, in ms
    pub button_hold_ms: u16,
    /// Samples needed to confirm a digital input
    pub button_reads: u8,
    /// Mid-stop engages every n-th cycle
    pub mid_stop_every: u16,
    pub mid_stop_pin: MidStopPin,
    pub stop_out: StopPolarity,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub timers: Timers,
    pub current: SensorConfig,
    pub temp: SensorConfig,
    pub params: Parametres,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            timers: Timers {
                opn1: 5,
                cls: 5,
                mid: 6,
                opn2: 8,
            },
            current: SensorConfig {
                status: Status::Active,
                samples: 5,
                v_max: 3.3,
                v0_ref: 1.512,
                factor: 60.0,
            },
            temp: SensorConfig {
                status: Status::Inactive,
                samples: 1,
                v_max: 3.3,
                v0_ref: 0.5,
                factor: 10.0,
            },
            params: Parametres {
                lcd_rows: 4,
                lcd_cols: 20,
                counter: CounterSource::Inactive,
                button_hold_ms: 500,
                button_reads: 1,
                mid_stop_every: 1,
                mid_stop_pin: MidStopPin::Open,
                stop_out: StopPolarity::NormallyOpen,
            },
        }
    }
}

impl Config {
    /// Applies the rules that hold for every run: without a mid-stop there
    /// is no second opening phase.
    pub fn normalized(mut self) -> Self {
        if self.timers.mid == 0 {
            self.timers.opn2 = 0;
        }
        self
    }

    pub fn to_blob(&self) -> anyhow::Result<Vec<u8>> {
        postcard::to_allocvec(self).context("encoding failure")
    }

    pub fn from_blob(blob: &[u8]) -> anyhow::Result<Self> {
        postcard::from_bytes(blob).context("error decoding config blob")
    }

    fn sensor(&self, group: Group) -> Option<&SensorConfig> {
        match group {
            Group::Current => Some(&self.current),
            Group::Temp => Some(&self.temp),
            _ => None,
        }
    }

    fn sensor_mut(&mut self, group: Group) -> Option<&mut SensorConfig> {
        match group {
            Group::Current => Some(&mut self.current),
            Group::Temp => Some(&mut self.temp),
            _ => None,
        }
    }

    /// Current value of `field` inside `group`
    pub fn value(&self, group: Group, field: Field) -> Result<Value, ConfigError> {
        if !group.fields().contains(&field) {
            return Err(ConfigError::NoSuchField(group, field));
        }
        let t = &self.timers;
        let p = &self.params;
        let value = match field {
            Field::Opn1 => Value::Int(t.opn1),
            Field::Cls => Value::Int(t.cls),
            Field::Mid => Value::Int(t.mid),
            Field::Opn2 => Value::Int(t.opn2),
            Field::LcdRows => Value::Int(p.lcd_rows.into()),
            Field::LcdCols => Value::Int(p.lcd_cols.into()),
            Field::Counter => Value::Counter(p.counter),
            Field::ButtonHold => Value::Int(p.button_hold_ms),
            Field::ButtonReads => Value::Int(p.button_reads.into()),
            Field::MidStop => Value::Int(p.mid_stop_every),
            Field::MidStopPin => Value::MidStopPin(p.mid_stop_pin),
            Field::StopOut => Value::StopOut(p.stop_out),
            sensor_field => {
                let s = self
                    .sensor(group)
                    .ok_or(ConfigError::NoSuchField(group, field))?;
                match sensor_field {
                    Field::Status => Value::Status(s.status),
                    Field::Samples => Value::Int(s.samples.into()),
                    Field::VMax => Value::Float(s.v_max),
                    Field::V0Ref => Value::Float(s.v0_ref),
                    _ => Value::Float(s.factor),
                }
            }
        };
        Ok(value)
    }

    /// Merges one edited value back into its group
    pub fn apply(&mut self, group: Group, field: Field, value: Value) -> Result<(), ConfigError> {
        if !group.fields().contains(&field) {
            return Err(ConfigError::NoSuchField(group, field));
        }
        let wrong = || ConfigError::WrongKind(field, value);
        let narrow = |v: u16| u8::try_from(v).map_err(|_| wrong());
        match (field, value) {
            (Field::Opn1, Value::Int(v)) => self.timers.opn1 = v,
            (Field::Cls, Value::Int(v)) => self.timers.cls = v,
            (Field::Mid, Value::Int(v)) => self.timers.mid = v,
            (Field::Opn2, Value::Int(v)) => self.timers.opn2 = v,
            (Field::LcdRows, Value::Int(v)) => self.params.lcd_rows = narrow(v)?,
            (Field::LcdCols, Value::Int(v)) => self.params.lcd_cols = narrow(v)?,
            (Field::Counter, Value::Counter(v)) => self.params.counter = v,
            (Field::ButtonHold, Value::Int(v)) => self.params.button_hold_ms = v,
            (Field::ButtonReads, Value::Int(v)) => self.params.button_reads = narrow(v)?,
            (Field::MidStop, Value::Int(v)) => self.params.mid_stop_every = v,
            (Field::MidStopPin, Value::MidStopPin(v)) => self.params.mid_stop_pin = v,
            (Field::StopOut, Value::StopOut(v)) => self.params.stop_out = v,
            (Field::Status, Value::Status(v)) => self.sensor_mut(group).ok_or_else(wrong)?.status = v,
            (Field::Samples, Value::Int(v)) => {
                let samples = narrow(v)?;
                self.sensor_mut(group).ok_or_else(wrong)?.samples = samples;
            }
            (Field::VMax, Value::Float(v)) => self.sensor_mut(group).ok_or_else(wrong)?.v_max = v,
            (Field::V0Ref, Value::Float(v)) => self.sensor_mut(group).ok_or_else(wrong)?.v0_ref = v,
            (Field::Factor, Value::Float(v)) => self.sensor_mut(group).ok_or_else(wrong)?.factor = v,
            _ => return Err(wrong()),
        }
        Ok(())
    }
}

/// Parameter groups shown by the menu, in persisted order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    Timers,
    Current,
    Temp,
    Parametres,
}

impl Group {
    pub fn fields(self) -> &'static [Field] {
        match self {
            Group::Timers => &[Field::Opn1, Field::Cls, Field::Mid, Field::Opn2],
            Group::Current => &[
                Field::Status,
                Field::Samples,
                Field::VMax,
                Field::V0Ref,
                Field::Factor,
            ],
            Group::Temp => &[Field::Status, Field::VMax, Field::V0Ref, Field::Factor],
            Group::Parametres => &[
                Field::LcdRows,
                Field::LcdCols,
                Field::Counter,
                Field::ButtonHold,
                Field::ButtonReads,
                Field::MidStop,
                Field::MidStopPin,
                Field::StopOut,
            ],
        }
    }

    /// Unit or meaning shown while `field` is edited
    pub fn hint(self, field: Field) -> Option<&'static str> {
        match (self, field) {
            (Group::Current, Field::Factor) => Some("xyz mV/A"),
            (Group::Current, Field::Samples) => Some("Nbre de lectures"),
            (Group::Temp, Field::Factor) => Some("xyz mV/Degre"),
            _ => None,
        }
    }

    /// Editing rule of `field` in this group
    pub fn rule(self, field: Field) -> Rule {
        match field {
            Field::Opn1 | Field::Cls | Field::Mid | Field::Opn2 => Rule::Wrap { max: TIMER_MAX },
            Field::Status | Field::Counter | Field::MidStopPin | Field::StopOut => Rule::Toggle,
            Field::Samples | Field::ButtonReads => Rule::Int { min: 1, max: 50 },
            Field::ButtonHold => Rule::Int { min: 0, max: 5000 },
            Field::MidStop => Rule::Int { min: 1, max: TIMER_MAX },
            Field::LcdRows => Rule::Int { min: 1, max: 4 },
            Field::LcdCols => Rule::Int { min: 8, max: 40 },
            Field::VMax | Field::V0Ref => Rule::Float {
                step: if self == Group::Temp { 0.01 } else { 0.001 },
                min: 0.0,
            },
            Field::Factor => Rule::Float { step: 0.1, min: 1.0 },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Opn1,
    Cls,
    Mid,
    Opn2,
    Status,
    Samples,
    VMax,
    V0Ref,
    Factor,
    LcdRows,
    LcdCols,
    Counter,
    ButtonHold,
    ButtonReads,
    MidStop,
    MidStopPin,
    StopOut,
}

impl Field {
    /// Key as stored and shown on the display
    pub fn key(self) -> &'static str {
        match self {
            Field::Opn1 => "Opn1",
            Field::Cls => "Cls",
            Field::Mid => "Mid",
            Field::Opn2 => "Opn2",
            Field::Status => "Statut",
            Field::Samples => "N_lect",
            Field::VMax => "V_max",
            Field::V0Ref => "V0_ref",
            Field::Factor => "Fcteur",
            Field::LcdRows => "LCD_li",
            Field::LcdCols => "LCD_co",
            Field::Counter => "Compteur",
            Field::ButtonHold => "btn_dura",
            Field::ButtonReads => "btn_lect",
            Field::MidStop => "MidStop",
            Field::MidStopPin => "MdStpPin",
            Field::StopOut => "StopOut",
        }
    }
}

/// How a field reacts to the encoder while edited
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rule {
    /// Cycles through the variants of an enumeration
    Toggle,
    /// Clamped integer
    Int { min: u16, max: u16 },
    /// Integer wrapping around between 0 and `max`
    Wrap { max: u16 },
    /// Fixed-step decimal, clamped at `min`
    Float { step: f32, min: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(u16),
    Float(f32),
    Status(Status),
    Counter(CounterSource),
    MidStopPin(MidStopPin),
    StopOut(StopPolarity),
}

impl Value {
    /// Moves the value `steps` increments according to `rule`
    pub fn adjust(self, rule: Rule, steps: i32) -> Value {
        match (self, rule) {
            (Value::Int(v), Rule::Int { min, max }) => {
                let next = (i32::from(v) + steps).clamp(i32::from(min), i32::from(max));
                Value::Int(next as u16)
            }
            (Value::Int(v), Rule::Wrap { max }) => {
                let span = i32::from(max) + 1;
                Value::Int((i32::from(v) + steps).rem_euclid(span) as u16)
            }
            (Value::Float(v), Rule::Float { step, min }) => {
                let next = ((v / step).round() + steps as f32) * step;
                let next = (next / step).round() * step;
                Value::Float(next.max(min))
            }
            (value, Rule::Toggle) if steps != 0 => value.toggled(steps > 0),
            (value, _) => value,
        }
    }

    fn toggled(self, forward: bool) -> Value {
        match self {
            Value::Status(s) => Value::Status(match s {
                Status::Active => Status::Inactive,
                Status::Inactive => Status::Active,
            }),
            Value::Counter(c) => {
                use CounterSource::*;
                Value::Counter(match (c, forward) {
                    (OpenLimit, true) | (Inactive, false) => CloseLimit,
                    (CloseLimit, true) | (OpenLimit, false) => Inactive,
                    (Inactive, true) | (CloseLimit, false) => OpenLimit,
                })
            }
            Value::MidStopPin(p) => Value::MidStopPin(match p {
                MidStopPin::Open => MidStopPin::Counter,
                MidStopPin::Counter => MidStopPin::Open,
            }),
            Value::StopOut(p) => Value::StopOut(match p {
                StopPolarity::NormallyOpen => StopPolarity::NormallyClosed,
                StopPolarity::NormallyClosed => StopPolarity::NormallyOpen,
            }),
            other => other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{:>3}", v),
            Value::Float(v) => write!(f, "{:.3}", v),
            Value::Status(Status::Active) => f.write_str("Active"),
            Value::Status(Status::Inactive) => f.write_str("Inactive"),
            Value::Counter(CounterSource::OpenLimit) => f.write_str("OpenLmt"),
            Value::Counter(CounterSource::CloseLimit) => f.write_str("CloseLmt"),
            Value::Counter(CounterSource::Inactive) => f.write_str("Inactive"),
            Value::MidStopPin(MidStopPin::Open) => f.write_str("Open"),
            Value::MidStopPin(MidStopPin::Counter) => f.write_str("Counter"),
            Value::StopOut(StopPolarity::NormallyOpen) => f.write_str("NO"),
            Value::StopOut(StopPolarity::NormallyClosed) => f.write_str("NC"),
        }
    }
}

/// Durable storage of the whole configuration
pub trait ConfigStore: Send {
    fn load(&self) -> anyhow::Result<Config>;
    fn save(&mut self, config: &Config) -> anyhow::Result<()>;
}

/// Store keeping the encoded blob in RAM
#[derive(Debug, Default)]
pub struct MemoryStore {
    blob: Option<Vec<u8>>,
    read_only: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(config: &Config) -> anyhow::Result<Self> {
        Ok(MemoryStore {
            blob: Some(config.to_blob()?),
            read_only: false,
        })
    }

    /// Makes every following save fail
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> anyhow::Result<Config> {
        let blob = self.blob.as_deref().context("No configuration stored")?;
        Config::from_blob(blob)
    }

    fn save(&mut self, config: &Config) -> anyhow::Result<()> {
        if self.read_only {
            anyhow::bail!("storage is read only");
        }
        self.blob = Some(config.to_blob()?);
        Ok(())
    }
}

/// Loads the persisted configuration, writing and re-reading the defaults
/// when nothing usable is stored. A failure on that fallback is fatal.
pub fn load_or_default(store: &mut dyn ConfigStore) -> anyhow::Result<Config> {
    match store.load() {
        Ok(config) => {
            log::info!("Configuration loaded");
            Ok(config)
        }
        Err(e) => {
            log::warn!("Could not load configuration ({:#}), writing defaults", e);
            store
                .save(&Config::default())
                .context("error writing default configuration")?;
            store
                .load()
                .context("error reloading default configuration")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mid_zero_forces_second_opening_to_zero() {
        let mut config = Config::default();
        config.timers.mid = 0;
        assert_eq!(config.normalized().timers.opn2, 0);
        assert_eq!(Config::default().normalized().timers.opn2, 8);
    }

    #[test]
    fn boot_writes_defaults_when_empty() {
        let mut store = MemoryStore::new();
        let config = load_or_default(&mut store).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(store.load().unwrap(), Config::default());
    }

    #[test]
    fn boot_keeps_stored_config() {
        let mut stored = Config::default();
        stored.timers.cls = 42;
        let mut store = MemoryStore::with(&stored).unwrap();
        assert_eq!(load_or_default(&mut store).unwrap().timers.cls, 42);
    }

    #[test]
    fn boot_fails_when_defaults_cannot_be_written() {
        let mut store = MemoryStore::new().read_only();
        assert!(load_or_default(&mut store).is_err());
    }

    #[test]
    fn apply_changes_only_the_field() {
        let mut config = Config::default();
        config
            .apply(Group::Temp, Field::VMax, Value::Float(5.0))
            .unwrap();
        assert_eq!(config.temp.v_max, 5.0);
        assert_eq!(config.current, Config::default().current);

        assert_eq!(
            config.apply(Group::Timers, Field::Status, Value::Int(1)),
            Err(ConfigError::NoSuchField(Group::Timers, Field::Status))
        );
        assert!(config
            .apply(Group::Timers, Field::Cls, Value::Float(1.0))
            .is_err());
    }

    #[test]
    fn temp_group_has_no_sample_count() {
        let config = Config::default();
        assert!(config.value(Group::Temp, Field::Samples).is_err());
        assert_eq!(
            config.value(Group::Current, Field::Samples),
            Ok(Value::Int(5))
        );
    }

    #[test]
    fn adjust_rules() {
        let wrap = Group::Timers.rule(Field::Cls);
        assert_eq!(Value::Int(0).adjust(wrap, -1), Value::Int(TIMER_MAX));
        assert_eq!(Value::Int(TIMER_MAX).adjust(wrap, 1), Value::Int(0));

        let reads = Group::Parametres.rule(Field::ButtonReads);
        assert_eq!(Value::Int(1).adjust(reads, -1), Value::Int(1));
        assert_eq!(Value::Int(1).adjust(reads, 10), Value::Int(11));

        let volts = Group::Current.rule(Field::V0Ref);
        match Value::Float(1.512).adjust(volts, 1) {
            Value::Float(v) => assert!((v - 1.513).abs() < 1e-6),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(Value::Float(0.0).adjust(volts, -1), Value::Float(0.0));

        let factor = Group::Temp.rule(Field::Factor);
        assert_eq!(Value::Float(1.0).adjust(factor, -1), Value::Float(1.0));

        let toggle = Group::Parametres.rule(Field::Counter);
        let c = Value::Counter(CounterSource::Inactive);
        assert_eq!(c.adjust(toggle, 1), Value::Counter(CounterSource::OpenLimit));
        assert_eq!(c.adjust(toggle, -1), Value::Counter(CounterSource::CloseLimit));
    }
}
