//! The persisted pet record and its simulation rules.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::value::{Record, StructuredValue};

pub const DEFAULT_NAME: &str = "Zorrito";
pub const DEFAULT_GAUGE: f64 = 50.0;
pub const GAUGE_MIN: f64 = 0.0;
pub const GAUGE_MAX: f64 = 100.0;

/// XP required per level: reaching `level * XP_PER_LEVEL` levels up.
pub const XP_PER_LEVEL: u32 = 100;

/// Field names of the persisted record.
pub mod fields {
    pub const NAME: &str = "name";
    pub const HUNGER: &str = "hunger";
    pub const HAPPINESS: &str = "happiness";
    pub const ENERGY: &str = "energy";
    pub const CLEANLINESS: &str = "cleanliness";
    pub const LEVEL: &str = "level";
    pub const XP: &str = "xp";
    pub const LAST_INTERACTION_TIME: &str = "last_interaction_time";
}

/// Clamp a gauge into `[0, 100]`. NaN falls back to the default.
pub fn clamp_gauge(value: f64) -> f64 {
    if value.is_nan() {
        DEFAULT_GAUGE
    } else {
        value.clamp(GAUGE_MIN, GAUGE_MAX)
    }
}

fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The application's one persisted record.
///
/// Hunger runs the opposite way to the other gauges: 0 is full, 100 is starving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PetState {
    pub name: String,
    pub hunger: f64,
    pub happiness: f64,
    pub energy: f64,
    pub cleanliness: f64,
    pub level: u32,
    pub xp: u32,
    pub last_interaction_time: String,
}

impl Default for PetState {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            hunger: DEFAULT_GAUGE,
            happiness: DEFAULT_GAUGE,
            energy: DEFAULT_GAUGE,
            cleanliness: DEFAULT_GAUGE,
            level: 1,
            xp: 0,
            last_interaction_time: now_iso8601(),
        }
    }
}

impl PetState {
    /// A default pet with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Field record written to the store.
    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert(fields::NAME.into(), self.name.clone().into());
        record.insert(fields::HUNGER.into(), self.hunger.into());
        record.insert(fields::HAPPINESS.into(), self.happiness.into());
        record.insert(fields::ENERGY.into(), self.energy.into());
        record.insert(fields::CLEANLINESS.into(), self.cleanliness.into());
        record.insert(fields::LEVEL.into(), self.level.into());
        record.insert(fields::XP.into(), self.xp.into());
        record.insert(
            fields::LAST_INTERACTION_TIME.into(),
            self.last_interaction_time.clone().into(),
        );
        record
    }

    /// Rebuild from a stored record.
    ///
    /// Missing or wrongly-kinded fields take their defaults; gauges are clamped
    /// into `[0, 100]`, `level` is at least 1 and `xp` at least 0.
    pub fn from_record(record: &Record) -> Self {
        let defaults = Self::default();
        let gauge = |key: &str| {
            record
                .get(key)
                .and_then(StructuredValue::as_f64)
                .map(clamp_gauge)
                .unwrap_or(DEFAULT_GAUGE)
        };
        let counter = |key: &str| record.get(key).and_then(integral);

        Self {
            name: record
                .get(fields::NAME)
                .and_then(StructuredValue::as_str)
                .map(str::to_string)
                .unwrap_or(defaults.name),
            hunger: gauge(fields::HUNGER),
            happiness: gauge(fields::HAPPINESS),
            energy: gauge(fields::ENERGY),
            cleanliness: gauge(fields::CLEANLINESS),
            level: counter(fields::LEVEL)
                .map(|l| l.clamp(1, i64::from(u32::MAX)) as u32)
                .unwrap_or(1),
            xp: counter(fields::XP)
                .map(|x| x.clamp(0, i64::from(u32::MAX)) as u32)
                .unwrap_or(0),
            last_interaction_time: record
                .get(fields::LAST_INTERACTION_TIME)
                .and_then(StructuredValue::as_str)
                .map(str::to_string)
                .unwrap_or(defaults.last_interaction_time),
        }
    }

    fn clamp_gauges(&mut self) {
        self.hunger = clamp_gauge(self.hunger);
        self.happiness = clamp_gauge(self.happiness);
        self.energy = clamp_gauge(self.energy);
        self.cleanliness = clamp_gauge(self.cleanliness);
    }

    fn touch(&mut self) {
        self.last_interaction_time = now_iso8601();
    }
}

/// Integer view of a counter field; integral doubles are accepted.
fn integral(value: &StructuredValue) -> Option<i64> {
    match value {
        StructuredValue::Integer(i) => Some(*i),
        StructuredValue::Double(d) if d.is_finite() && d.fract() == 0.0 => Some(*d as i64),
        _ => None,
    }
}

// ─── Simulation ──────────────────────────────────────────────────────────────

impl PetState {
    /// Advance time by `dt` seconds: the pet gets hungrier, sadder, more tired and dirtier.
    pub fn tick(&mut self, dt: f64) {
        self.hunger += 0.5 * dt;
        self.happiness -= 0.2 * dt;
        self.energy -= 0.1 * dt;
        self.cleanliness -= 0.3 * dt;
        self.clamp_gauges();
    }

    /// Returns `true` if the action caused a level-up.
    pub fn feed(&mut self) -> bool {
        self.hunger -= 30.0;
        self.happiness += 15.0;
        self.interact(5)
    }

    pub fn play(&mut self) -> bool {
        self.happiness += 25.0;
        self.energy -= 20.0;
        self.interact(10)
    }

    pub fn clean(&mut self) -> bool {
        self.cleanliness += 40.0;
        self.happiness += 5.0;
        self.interact(3)
    }

    pub fn sleep(&mut self) -> bool {
        self.energy += 50.0;
        self.happiness += 5.0;
        self.interact(2)
    }

    fn interact(&mut self, xp_gain: u32) -> bool {
        self.clamp_gauges();
        self.xp = self.xp.saturating_add(xp_gain);
        self.touch();
        self.check_level_up()
    }

    /// Level up once if enough XP has been collected; XP restarts at zero.
    pub fn check_level_up(&mut self) -> bool {
        let needed = self.level.saturating_mul(XP_PER_LEVEL);
        if self.xp >= needed {
            self.level = self.level.saturating_add(1);
            self.xp = 0;
            log::info!("{} reached level {}", self.name, self.level);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(key: &str, value: StructuredValue) -> Record {
        let mut record = Record::new();
        record.insert(key.to_string(), value);
        record
    }

    #[test]
    fn test_default_pet() {
        let pet = PetState::default();
        assert_eq!(pet.name, "Zorrito");
        assert_eq!(pet.hunger, 50.0);
        assert_eq!(pet.happiness, 50.0);
        assert_eq!(pet.energy, 50.0);
        assert_eq!(pet.cleanliness, 50.0);
        assert_eq!(pet.level, 1);
        assert_eq!(pet.xp, 0);
        assert!(chrono::DateTime::parse_from_rfc3339(&pet.last_interaction_time).is_ok());
    }

    #[test]
    fn test_record_roundtrip() {
        let mut pet = PetState::named("Kit");
        pet.hunger = 12.5;
        pet.level = 4;
        pet.xp = 37;
        let restored = PetState::from_record(&pet.to_record());
        assert_eq!(restored, pet);
    }

    #[test]
    fn test_record_field_kinds() {
        let record = PetState::default().to_record();
        assert!(matches!(record["hunger"], StructuredValue::Double(_)));
        assert!(matches!(record["level"], StructuredValue::Integer(1)));
        assert!(matches!(record["xp"], StructuredValue::Integer(0)));
        assert!(matches!(record["name"], StructuredValue::String(_)));
    }

    #[test]
    fn test_gauges_are_clamped_on_decode() {
        for (input, expected) in [(150, 100.0), (-10, 0.0), (0, 0.0)] {
            let record = record_with("hunger", StructuredValue::Integer(input));
            // Decoding the same record again must give the same clamped value.
            let first = PetState::from_record(&record);
            let second = PetState::from_record(&first.to_record());
            assert_eq!(first.hunger, expected, "input {input}");
            assert_eq!(second.hunger, expected, "input {input}");
        }
    }

    #[test]
    fn test_nan_gauge_falls_back_to_default() {
        let record = record_with("energy", StructuredValue::Double(f64::NAN));
        assert_eq!(PetState::from_record(&record).energy, DEFAULT_GAUGE);
    }

    #[test]
    fn test_missing_and_mistyped_fields_take_defaults() {
        let mut record = record_with("name", StructuredValue::Integer(3));
        record.insert("level".into(), StructuredValue::String("two".into()));
        record.insert("xp".into(), StructuredValue::Integer(-4));
        record.insert("unknown".into(), StructuredValue::Boolean(true));
        let pet = PetState::from_record(&record);
        assert_eq!(pet.name, "Zorrito");
        assert_eq!(pet.level, 1);
        assert_eq!(pet.xp, 0);
    }

    #[test]
    fn test_level_never_below_one() {
        let record = record_with("level", StructuredValue::Integer(0));
        assert_eq!(PetState::from_record(&record).level, 1);
        let record = record_with("level", StructuredValue::Double(3.0));
        assert_eq!(PetState::from_record(&record).level, 3);
    }

    #[test]
    fn test_tick_decays_and_clamps() {
        let mut pet = PetState::default();
        pet.tick(10.0);
        assert_eq!(pet.hunger, 55.0);
        assert_eq!(pet.happiness, 48.0);
        assert_eq!(pet.energy, 49.0);
        assert_eq!(pet.cleanliness, 47.0);

        pet.tick(1_000.0);
        assert_eq!(pet.hunger, 100.0);
        assert_eq!(pet.happiness, 0.0);
        assert_eq!(pet.energy, 0.0);
        assert_eq!(pet.cleanliness, 0.0);
    }

    #[test]
    fn test_actions() {
        let mut pet = PetState::default();
        pet.feed();
        assert_eq!(pet.hunger, 20.0);
        assert_eq!(pet.happiness, 65.0);
        assert_eq!(pet.xp, 5);

        pet.play();
        assert_eq!(pet.happiness, 90.0);
        assert_eq!(pet.energy, 30.0);
        assert_eq!(pet.xp, 15);

        pet.clean();
        assert_eq!(pet.cleanliness, 90.0);
        assert_eq!(pet.happiness, 95.0);

        pet.sleep();
        assert_eq!(pet.energy, 80.0);
        assert_eq!(pet.happiness, 100.0);
        assert_eq!(pet.xp, 20);
    }

    #[test]
    fn test_level_up_resets_xp() {
        let mut pet = PetState::default();
        pet.xp = 95;
        assert!(pet.feed());
        assert_eq!(pet.level, 2);
        assert_eq!(pet.xp, 0);

        pet.xp = 180;
        assert!(!pet.play());
        assert_eq!(pet.level, 2);
        assert_eq!(pet.xp, 190);

        pet.xp = 200;
        assert!(pet.check_level_up());
        assert_eq!(pet.level, 3);
        assert_eq!(pet.xp, 0);
    }
}
