//! Parsing for Go-style duration strings (`1h30m`, `250ms`, `1.5s`), as used
//! throughout Gateway API resources.

use std::time::Duration;

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum ParseError {
    #[error("duration is empty")]
    Empty,

    #[error("negative durations are not supported")]
    Negative,

    #[error("unknown unit {0:?}; expected one of 'ns', 'us', 'ms', 's', 'm', or 'h'")]
    InvalidUnit(String),

    #[error("missing a unit after {0:?}")]
    NoUnit(String),

    #[error("invalid number {0:?}")]
    NotANumber(String),
}

pub fn parse_duration(s: &str) -> Result<Duration, ParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ParseError::Empty);
    }
    if s.starts_with('-') {
        return Err(ParseError::Negative);
    }
    let mut rest = s.trim_start_matches('+');
    if rest == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let unit_start = rest
            .find(|c: char| c.is_alphabetic() || c == '\u{00b5}' || c == '\u{03bc}')
            .ok_or_else(|| ParseError::NoUnit(rest.to_string()))?;
        let (value, tail) = rest.split_at(unit_start);
        let value = value
            .parse::<f64>()
            .map_err(|_| ParseError::NotANumber(value.to_string()))?;
        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_end);
        let base = match unit {
            "ns" => Duration::from_nanos(1),
            "us" | "\u{00b5}s" | "\u{03bc}s" => Duration::from_micros(1),
            "ms" => Duration::from_millis(1),
            "s" => Duration::from_secs(1),
            "m" => Duration::from_secs(60),
            "h" => Duration::from_secs(60 * 60),
            unit => return Err(ParseError::InvalidUnit(unit.to_string())),
        };
        if value.fract() == 0.0 && value <= f64::from(u32::MAX) {
            total += base * (value as u32);
        } else {
            total += base.mul_f64(value);
        }
        rest = tail;
    }
    Ok(total)
}
