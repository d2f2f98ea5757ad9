use std::fmt;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Weekday};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    config::{ZoneLimits, MAX_SCHEDULES},
    error::ConfigError,
    types::ZoneId,
};

const MINUTES_PER_DAY: u16 = 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        Self::Sun,
        Self::Mon,
        Self::Tue,
        Self::Wed,
        Self::Thu,
        Self::Fri,
        Self::Sat,
    ];

    /// Position in the rule day mask; Sunday is bit 0.
    pub fn bit(self) -> u8 {
        match self {
            Self::Sun => 0,
            Self::Mon => 1,
            Self::Tue => 2,
            Self::Wed => 3,
            Self::Thu => 4,
            Self::Fri => 5,
            Self::Sat => 6,
        }
    }

    pub fn from_chrono(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => Self::Mon,
            Weekday::Tue => Self::Tue,
            Weekday::Wed => Self::Wed,
            Weekday::Thu => Self::Thu,
            Weekday::Fri => Self::Fri,
            Weekday::Sat => Self::Sat,
            Weekday::Sun => Self::Sun,
        }
    }
}

/// Seven-bit day set, serialized as a list of day names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<DayOfWeek>", into = "Vec<DayOfWeek>")]
pub struct DayMask(u8);

impl DayMask {
    pub const EVERY_DAY: DayMask = DayMask(0x7F);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, day: DayOfWeek) -> bool {
        self.0 & (1 << day.bit()) != 0
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0 && self.0 <= 0x7F
    }
}

impl From<Vec<DayOfWeek>> for DayMask {
    fn from(days: Vec<DayOfWeek>) -> Self {
        Self(days.iter().fold(0, |mask, day| mask | (1 << day.bit())))
    }
}

impl From<DayMask> for Vec<DayOfWeek> {
    fn from(mask: DayMask) -> Self {
        DayOfWeek::ALL
            .into_iter()
            .filter(|day| mask.contains(*day))
            .collect()
    }
}

/// Minutes since local midnight, serialized as `"HH:MM"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub fn from_minutes(minutes: u16) -> Option<Self> {
        (minutes < MINUTES_PER_DAY).then_some(Self(minutes))
    }

    pub fn from_hm(hour: u8, minute: u8) -> Option<Self> {
        if hour >= 24 || minute >= 60 {
            return None;
        }
        Self::from_minutes(hour as u16 * 60 + minute as u16)
    }

    pub fn minutes(self) -> u16 {
        self.0
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let invalid = || ConfigError::InvalidTimeOfDay(value.clone());
        let (hour, minute) = value.trim().split_once(':').ok_or_else(invalid)?;
        let hour = hour.parse::<u8>().map_err(|_| invalid())?;
        let minute = minute.parse::<u8>().map_err(|_| invalid())?;
        Self::from_hm(hour, minute).ok_or_else(invalid)
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct ScheduleRule {
    pub enabled: bool,
    pub days: DayMask,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub zone: ZoneId,
    #[serde(rename = "target")]
    pub target_c: f32,
}

impl Default for ScheduleRule {
    fn default() -> Self {
        Self {
            enabled: false,
            days: DayMask::default(),
            start: TimeOfDay::default(),
            end: TimeOfDay::default(),
            zone: ZoneId::Floor,
            target_c: ZoneLimits::for_zone(ZoneId::Floor).default_target_c,
        }
    }
}

/// A stored rule with an unparseable field loads as a disabled slot, so the
/// remaining rules still load.
impl From<Value> for ScheduleRule {
    fn from(value: Value) -> Self {
        let days = rule_field::<DayMask>(&value, "days");
        let start = rule_field::<TimeOfDay>(&value, "start");
        let end = rule_field::<TimeOfDay>(&value, "end");
        let zone = rule_field::<ZoneId>(&value, "zone");
        let target_c = rule_field::<f32>(&value, "target");

        match (days, start, end, zone, target_c) {
            (Some(days), Some(start), Some(end), Some(zone), Some(target_c)) => Self {
                enabled: rule_field(&value, "enabled").unwrap_or(false),
                days,
                start,
                end,
                zone,
                target_c,
            },
            _ => {
                warn!("disabling malformed schedule rule: {value}");
                Self::default()
            }
        }
    }
}

fn rule_field<T: DeserializeOwned>(rule: &Value, name: &str) -> Option<T> {
    rule.get(name).and_then(|field| T::deserialize(field).ok())
}

impl ScheduleRule {
    /// A malformed rule never matches; it behaves exactly like a disabled one.
    pub fn validate(&self) -> bool {
        self.days.is_valid()
            && self.start.minutes() < MINUTES_PER_DAY
            && self.end.minutes() < MINUTES_PER_DAY
            && ZoneLimits::for_zone(self.zone).contains_target(self.target_c)
    }

    pub fn is_active(&self) -> bool {
        self.enabled && self.validate()
    }

    /// Window membership. `start > end` spans midnight.
    pub fn contains(&self, minutes: u16) -> bool {
        let start = self.start.minutes();
        let end = self.end.minutes();
        if start <= end {
            start <= minutes && minutes < end
        } else {
            minutes >= start || minutes < end
        }
    }

    pub fn matches(&self, day: DayOfWeek, minutes: u16) -> bool {
        self.is_active() && self.days.contains(day) && self.contains(minutes)
    }

    pub fn summary(&self) -> String {
        format!("{}-{} {:.0}C", self.start, self.end, self.target_c)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub rules: Vec<ScheduleRule>,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            rules: vec![ScheduleRule::default(); MAX_SCHEDULES],
        }
    }
}

impl Schedule {
    pub fn normalize(&mut self) {
        self.rules.truncate(MAX_SCHEDULES);
        self.rules.resize(MAX_SCHEDULES, ScheduleRule::default());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallClock {
    pub day: DayOfWeek,
    pub minutes: u16,
}

impl WallClock {
    pub fn from_datetime<Tz: TimeZone>(now: &DateTime<Tz>) -> Self {
        Self {
            day: DayOfWeek::from_chrono(now.weekday()),
            minutes: (now.hour() * 60 + now.minute()) as u16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScheduleOutcome {
    /// Per-zone target injected by the schedule, indexed by [`ZoneId::index`].
    pub targets: [Option<f32>; 2],
    pub active_rule: Option<usize>,
    pub summary: Option<String>,
}

impl ScheduleOutcome {
    pub fn target(&self, zone: ZoneId) -> Option<f32> {
        self.targets[zone.index()]
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleResolver {
    time_valid: bool,
    last: ScheduleOutcome,
}

impl ScheduleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pure evaluation. Later slots overwrite earlier ones for the same zone.
    pub fn resolve(&self, schedule: &Schedule, day: DayOfWeek, minutes: u16) -> ScheduleOutcome {
        let mut outcome = ScheduleOutcome::default();

        for (index, rule) in schedule.rules.iter().enumerate().take(MAX_SCHEDULES) {
            if !rule.matches(day, minutes) {
                continue;
            }
            outcome.targets[rule.zone.index()] = Some(rule.target_c);
            outcome.active_rule = Some(index);
            outcome.summary = Some(rule.summary());
        }

        outcome
    }

    pub fn evaluate(&mut self, schedule: &Schedule, clock: WallClock) -> ScheduleOutcome {
        let outcome = self.resolve(schedule, clock.day, clock.minutes);
        if outcome.active_rule != self.last.active_rule {
            debug!(
                "schedule active rule changed: {:?} -> {:?}",
                self.last.active_rule, outcome.active_rule
            );
        }
        self.last = outcome.clone();
        outcome
    }

    pub fn is_rule_active_at(
        &self,
        schedule: &Schedule,
        index: usize,
        day: DayOfWeek,
        hour: u8,
        minute: u8,
    ) -> bool {
        let Some(time) = TimeOfDay::from_hm(hour, minute) else {
            return false;
        };
        index < MAX_SCHEDULES
            && schedule
                .rules
                .get(index)
                .is_some_and(|rule| rule.matches(day, time.minutes()))
    }

    pub fn set_time_valid(&mut self, valid: bool) {
        self.time_valid = valid;
        if !valid {
            self.last = ScheduleOutcome::default();
        }
    }

    pub fn time_valid(&self) -> bool {
        self.time_valid
    }

    pub fn last_outcome(&self) -> &ScheduleOutcome {
        &self.last
    }
}
