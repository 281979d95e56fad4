/*
 *  cadence.rs
 *
 *  InkSlate - plugins on paper
 *	(c) 2020-26 Stuart Hunter
 *
 *	Five-field cron cadence expressions: minute, hour, day-of-month,
 *	month, day-of-week. Tick granularity is one minute; matching is
 *	evaluated against wall-clock time in the device timezone.
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */

use chrono::{DateTime, Datelike, TimeZone, Timelike};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CadenceError {
    #[error("cadence '{expr}' must have five fields, found {found}")]
    FieldCount { expr: String, found: usize },
    #[error("cadence field '{field}' is invalid: {reason}")]
    BadField { field: String, reason: String },
}

/// One parsed field: a bitmask of permitted values plus whether the
/// field is restricted. Following vixie cron, any field beginning with
/// `*` (including `*/n`) counts as unrestricted for the day-field rule.
#[derive(Debug, Clone, Copy, PartialEq)]
struct FieldSpec {
    mask: u64,
    restricted: bool,
}

impl FieldSpec {
    fn contains(&self, value: u32) -> bool {
        self.mask & (1u64 << value) != 0
    }
}

/// A parsed five-field cadence expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Cadence {
    minute: FieldSpec,
    hour: FieldSpec,
    day_of_month: FieldSpec,
    month: FieldSpec,
    day_of_week: FieldSpec,
}

impl Cadence {
    /// Parses `minute hour day-of-month month day-of-week`. Each field is
    /// a value, comma list, range, step, or wildcard. Day-of-week accepts
    /// 0-7 with both 0 and 7 meaning Sunday.
    pub fn parse(expr: &str) -> Result<Cadence, CadenceError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CadenceError::FieldCount {
                expr: expr.to_string(),
                found: fields.len(),
            });
        }
        let minute = parse_field(fields[0], 0, 59)?;
        let hour = parse_field(fields[1], 0, 23)?;
        let day_of_month = parse_field(fields[2], 1, 31)?;
        let month = parse_field(fields[3], 1, 12)?;
        let mut day_of_week = parse_field(fields[4], 0, 7)?;
        // fold 7 (Sunday) onto 0
        if day_of_week.contains(7) {
            day_of_week.mask |= 1;
            day_of_week.mask &= !(1u64 << 7);
        }
        Ok(Cadence {
            minute,
            hour,
            day_of_month,
            month,
            day_of_week,
        })
    }

    /// Whether the expression matches the wall-clock minute of `t`.
    ///
    /// Day-of-month and day-of-week follow the vixie-cron rule: when both
    /// fields are restricted, the expression matches if either does;
    /// when either begins with `*`, both must match.
    pub fn matches<Tz: TimeZone>(&self, t: &DateTime<Tz>) -> bool {
        if !self.minute.contains(t.minute()) {
            return false;
        }
        if !self.hour.contains(t.hour()) {
            return false;
        }
        if !self.month.contains(t.month()) {
            return false;
        }
        let dom_ok = self.day_of_month.contains(t.day());
        let dow_ok = self.day_of_week.contains(t.weekday().num_days_from_sunday());
        if self.day_of_month.restricted && self.day_of_week.restricted {
            dom_ok || dow_ok
        } else {
            dom_ok && dow_ok
        }
    }
}

fn parse_field(field: &str, min: u32, max: u32) -> Result<FieldSpec, CadenceError> {
    let fail = |reason: String| CadenceError::BadField {
        field: field.to_string(),
        reason,
    };
    if field.is_empty() {
        return Err(fail("empty field".to_string()));
    }

    let mut mask = 0u64;
    // vixie cron keys the star flag off the field's first character
    let restricted = !field.starts_with('*');

    for part in field.split(',') {
        let (base, step) = match part.split_once('/') {
            Some((b, s)) => {
                let step: u32 = s
                    .parse()
                    .map_err(|_| fail(format!("step '{}' is not a number", s)))?;
                if step == 0 {
                    return Err(fail("step must be at least 1".to_string()));
                }
                (b, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if base == "*" {
            (min, max)
        } else if let Some((a, b)) = base.split_once('-') {
            let lo: u32 = a
                .parse()
                .map_err(|_| fail(format!("'{}' is not a number", a)))?;
            let hi: u32 = b
                .parse()
                .map_err(|_| fail(format!("'{}' is not a number", b)))?;
            if lo > hi {
                return Err(fail(format!("range {}-{} is inverted", lo, hi)));
            }
            (lo, hi)
        } else {
            let v: u32 = base
                .parse()
                .map_err(|_| fail(format!("'{}' is not a number", base)))?;
            (v, v)
        };

        if lo < min || hi > max {
            return Err(fail(format!(
                "values must be within {}..={}, got {}..={}",
                min, max, lo, hi
            )));
        }

        let mut v = lo;
        while v <= hi {
            mask |= 1u64 << v;
            v += step;
        }
    }

    Ok(FieldSpec { mask, restricted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Tz;

    fn at(tz: Tz, y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Tz> {
        tz.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn every_minute() {
        let c = Cadence::parse("* * * * *").unwrap();
        assert!(c.matches(&at(Tz::UTC, 2026, 8, 29, 13, 37)));
    }

    #[test]
    fn step_every_thirty_minutes() {
        let c = Cadence::parse("*/30 * * * *").unwrap();
        assert!(c.matches(&at(Tz::UTC, 2026, 8, 29, 9, 0)));
        assert!(c.matches(&at(Tz::UTC, 2026, 8, 29, 9, 30)));
        assert!(!c.matches(&at(Tz::UTC, 2026, 8, 29, 9, 15)));
    }

    #[test]
    fn lists_and_ranges() {
        let c = Cadence::parse("0,15,45 9-17 * * *").unwrap();
        assert!(c.matches(&at(Tz::UTC, 2026, 8, 29, 9, 15)));
        assert!(c.matches(&at(Tz::UTC, 2026, 8, 29, 17, 45)));
        assert!(!c.matches(&at(Tz::UTC, 2026, 8, 29, 18, 0)));
        assert!(!c.matches(&at(Tz::UTC, 2026, 8, 29, 9, 30)));
    }

    #[test]
    fn range_with_step() {
        let c = Cadence::parse("10-50/20 * * * *").unwrap();
        for minute in [10, 30, 50] {
            assert!(c.matches(&at(Tz::UTC, 2026, 8, 29, 0, minute)));
        }
        assert!(!c.matches(&at(Tz::UTC, 2026, 8, 29, 0, 20)));
    }

    #[test]
    fn sunday_accepts_both_spellings() {
        // 2026-08-30 is a Sunday
        let zero = Cadence::parse("0 8 * * 0").unwrap();
        let seven = Cadence::parse("0 8 * * 7").unwrap();
        let sunday = at(Tz::UTC, 2026, 8, 30, 8, 0);
        assert!(zero.matches(&sunday));
        assert!(seven.matches(&sunday));
    }

    #[test]
    fn dom_dow_or_rule() {
        // both restricted: the 15th OR any Monday
        let c = Cadence::parse("0 0 15 * 1").unwrap();
        assert!(c.matches(&at(Tz::UTC, 2026, 9, 15, 0, 0))); // a Tuesday, but the 15th
        assert!(c.matches(&at(Tz::UTC, 2026, 9, 14, 0, 0))); // a Monday
        assert!(!c.matches(&at(Tz::UTC, 2026, 9, 16, 0, 0)));
    }

    #[test]
    fn star_step_day_field_does_not_relax_the_other() {
        // day-of-month begins with '*', so both day fields must match:
        // odd days that are also Mondays
        let c = Cadence::parse("0 0 */2 * 1").unwrap();
        assert!(c.matches(&at(Tz::UTC, 2026, 9, 7, 0, 0))); // Monday the 7th
        assert!(!c.matches(&at(Tz::UTC, 2026, 9, 14, 0, 0))); // Monday the 14th
        assert!(!c.matches(&at(Tz::UTC, 2026, 9, 15, 0, 0))); // Tuesday the 15th
    }

    #[test]
    fn star_step_day_of_month_still_filters_days() {
        let c = Cadence::parse("0 0 */2 * *").unwrap();
        assert!(c.matches(&at(Tz::UTC, 2026, 9, 3, 0, 0)));
        assert!(!c.matches(&at(Tz::UTC, 2026, 9, 4, 0, 0)));
    }

    #[test]
    fn timezone_shifts_the_match() {
        let c = Cadence::parse("0 9 * * *").unwrap();
        let utc = at(Tz::UTC, 2026, 1, 15, 14, 0);
        // 14:00 UTC is 09:00 in New York during standard time
        let ny = utc.with_timezone(&Tz::America__New_York);
        assert!(!c.matches(&utc));
        assert!(c.matches(&ny));
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(Cadence::parse("* * * *").is_err());
        assert!(Cadence::parse("61 * * * *").is_err());
        assert!(Cadence::parse("a * * * *").is_err());
        assert!(Cadence::parse("*/0 * * * *").is_err());
        assert!(Cadence::parse("30-10 * * * *").is_err());
        assert!(Cadence::parse("* * 0 * *").is_err());
    }
}
