//! Operation timeouts
//!
//! Each resource type declares default create/update/delete timeouts. Callers
//! override them through the `timeouts` map attribute using duration strings
//! such as `30m`, `1h30m` or `20s`.

use std::time::Duration;

use crate::resource::{AttributeMap, Attributes};

/// Name of the attribute holding per-resource overrides
pub const TIMEOUTS_ATTRIBUTE: &str = "timeouts";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::uniform(Duration::from_secs(10 * 60))
    }
}

impl Timeouts {
    /// The same timeout for every operation
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            create: timeout,
            update: timeout,
            delete: timeout,
        }
    }

    pub fn minutes(create: u64, update: u64, delete: u64) -> Self {
        Self {
            create: Duration::from_secs(create * 60),
            update: Duration::from_secs(update * 60),
            delete: Duration::from_secs(delete * 60),
        }
    }

    /// Apply overrides found in the `timeouts` attribute
    pub fn with_overrides(mut self, attributes: &Attributes) -> Result<Self, DurationError> {
        let Some(overrides) = attributes.get_map(TIMEOUTS_ATTRIBUTE) else {
            return Ok(self);
        };
        if let Some(s) = overrides.get_str("create") {
            self.create = parse_duration(s)?;
        }
        if let Some(s) = overrides.get_str("update") {
            self.update = parse_duration(s)?;
        }
        if let Some(s) = overrides.get_str("delete") {
            self.delete = parse_duration(s)?;
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid duration '{input}': {reason}")]
pub struct DurationError {
    pub input: String,
    pub reason: &'static str,
}

/// Parse a duration such as `1h30m`, `45s` or `1.5h`
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let err = |reason| DurationError {
        input: input.to_string(),
        reason,
    };

    let s = input.trim();
    if s.is_empty() {
        return Err(err("empty duration"));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| err("missing unit"))?;
        if number_len == 0 {
            return Err(err("expected a number"));
        }
        let number: f64 = rest[..number_len]
            .parse()
            .map_err(|_| err("invalid number"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds = match &rest[..unit_len] {
            "h" => 3600.0,
            "m" => 60.0,
            "s" => 1.0,
            "ms" => 0.001,
            _ => return Err(err("unknown unit")),
        };
        rest = &rest[unit_len..];
        total += number * seconds;
    }

    Duration::try_from_secs_f64(total).map_err(|_| err("duration too large"))
}
