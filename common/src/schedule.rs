// Schedule parsing and calculation module
//
// Cron expressions are accepted in standard 5-field form, Quartz-style 6-field
// form (leading seconds) and 7-field form (trailing year). Everything is
// normalized to the 6/7-field dialect understood by the `cron` crate before
// parsing. Time zones accept IANA names and common Windows identifiers.

use crate::errors::ScheduleError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;

/// Windows time zone identifiers mapped to their IANA equivalents
const WINDOWS_TIME_ZONES: &[(&str, &str)] = &[
    ("UTC", "UTC"),
    ("Coordinated Universal Time", "UTC"),
    ("GMT Standard Time", "Europe/London"),
    ("W. Europe Standard Time", "Europe/Berlin"),
    ("Romance Standard Time", "Europe/Paris"),
    ("Central Europe Standard Time", "Europe/Budapest"),
    ("Central European Standard Time", "Europe/Warsaw"),
    ("E. Europe Standard Time", "Europe/Chisinau"),
    ("FLE Standard Time", "Europe/Kiev"),
    ("GTB Standard Time", "Europe/Bucharest"),
    ("Russian Standard Time", "Europe/Moscow"),
    ("Eastern Standard Time", "America/New_York"),
    ("Central Standard Time", "America/Chicago"),
    ("Mountain Standard Time", "America/Denver"),
    ("US Mountain Standard Time", "America/Phoenix"),
    ("Pacific Standard Time", "America/Los_Angeles"),
    ("Alaskan Standard Time", "America/Anchorage"),
    ("Hawaiian Standard Time", "Pacific/Honolulu"),
    ("Atlantic Standard Time", "America/Halifax"),
    ("E. South America Standard Time", "America/Sao_Paulo"),
    ("Arabian Standard Time", "Asia/Dubai"),
    ("India Standard Time", "Asia/Kolkata"),
    ("SE Asia Standard Time", "Asia/Bangkok"),
    ("China Standard Time", "Asia/Shanghai"),
    ("Singapore Standard Time", "Asia/Singapore"),
    ("Tokyo Standard Time", "Asia/Tokyo"),
    ("Korea Standard Time", "Asia/Seoul"),
    ("AUS Eastern Standard Time", "Australia/Sydney"),
    ("New Zealand Standard Time", "Pacific/Auckland"),
    ("South Africa Standard Time", "Africa/Johannesburg"),
];

/// Get the default timezone for triggers
pub fn default_timezone() -> Tz {
    chrono_tz::UTC
}

/// Resolve an optional IANA or Windows zone identifier, falling back to UTC
pub fn resolve_time_zone(time_zone: Option<&str>) -> Tz {
    let Some(id) = time_zone.map(str::trim).filter(|id| !id.is_empty()) else {
        return default_timezone();
    };

    if let Ok(tz) = id.parse::<Tz>() {
        return tz;
    }

    let mapped = WINDOWS_TIME_ZONES
        .iter()
        .find(|(windows, _)| windows.eq_ignore_ascii_case(id))
        .and_then(|(_, iana)| iana.parse::<Tz>().ok());

    match mapped {
        Some(tz) => tz,
        None => {
            tracing::warn!(time_zone = id, "Unrecognized time zone, falling back to UTC");
            default_timezone()
        }
    }
}

/// Rewrite an expression into the 6/7-field dialect of the `cron` crate
pub fn normalize_cron_expression(expression: &str) -> Result<String, ScheduleError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();

    let fields: Vec<String> = match fields.len() {
        5 => {
            // Standard cron: minute hour day-of-month month day-of-week (0/7 = Sunday)
            let mut normalized = vec!["0".to_string()];
            normalized.extend(fields[..4].iter().map(|f| f.to_string()));
            normalized.push(translate_standard_day_of_week(fields[4], expression)?);
            normalized
        }
        6 | 7 => fields.iter().map(|f| f.to_string()).collect(),
        n => {
            return Err(invalid_expression(
                expression,
                format!("expected 5, 6 or 7 fields, got {}", n),
            ))
        }
    };

    Ok(fields
        .into_iter()
        .map(|f| if f == "?" { "*".to_string() } else { f })
        .collect::<Vec<_>>()
        .join(" "))
}

/// Parse and validate a cron expression
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
    let normalized = normalize_cron_expression(expression)?;
    CronSchedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Parse an expression and require at least one fire time after now
pub fn validate_cron_expression(expression: &str, timezone: Tz) -> Result<CronSchedule, ScheduleError> {
    let schedule = parse_cron_expression(expression)?;
    if next_fire_after(&schedule, timezone, Utc::now()).is_none() {
        return Err(ScheduleError::NoNextExecution {
            expression: expression.to_string(),
        });
    }
    Ok(schedule)
}

/// Next fire time strictly after `after`, evaluated in `timezone`
pub fn next_fire_after(
    schedule: &CronSchedule,
    timezone: Tz,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&timezone))
        .next()
        .map(|next| next.with_timezone(&Utc))
}

/// Smallest gap between consecutive fires among the next `samples` fire times
pub fn shortest_interval(
    schedule: &CronSchedule,
    timezone: Tz,
    after: DateTime<Utc>,
    samples: usize,
) -> Option<chrono::Duration> {
    let fires: Vec<_> = schedule
        .after(&after.with_timezone(&timezone))
        .take(samples)
        .collect();
    fires.windows(2).map(|pair| pair[1] - pair[0]).min()
}

fn invalid_expression(expression: &str, reason: String) -> ScheduleError {
    ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason,
    }
}

/// Standard cron numbers days 0-7 from Sunday; the `cron` crate numbers them 1-7
fn translate_standard_day_of_week(field: &str, expression: &str) -> Result<String, ScheduleError> {
    field
        .split(',')
        .map(|part| {
            translate_day_of_week_part(part).ok_or_else(|| {
                invalid_expression(
                    expression,
                    format!("unsupported day-of-week value '{}'", part),
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(|parts| parts.join(","))
}

fn translate_day_of_week_part(part: &str) -> Option<String> {
    let (base, step) = match part.split_once('/') {
        Some((base, step)) => (base, Some(step)),
        None => (part, None),
    };

    if base == "*" || base == "?" || base.chars().any(|c| c.is_ascii_alphabetic()) {
        return Some(part.to_string());
    }

    let translated = match base.split_once('-') {
        Some((lo, hi)) => {
            let lo: u8 = lo.parse().ok()?;
            let hi: u8 = hi.parse().ok()?;
            if lo > hi || hi > 7 {
                return None;
            }
            match (lo, hi) {
                (0, 7) => "1-7".to_string(),
                // Range ending on Sunday wraps around the week
                (lo, 7) if step.is_none() => format!("{}-7,1", lo + 1),
                (_, 7) => return None,
                (lo, hi) => format!("{}-{}", lo + 1, hi + 1),
            }
        }
        None => {
            let day: u8 = base.parse().ok()?;
            if day > 7 {
                return None;
            }
            (day % 7 + 1).to_string()
        }
    };

    Some(match step {
        Some(step) => format!("{}/{}", translated, step),
        None => translated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_shortest_interval() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let every_second = parse_cron_expression("* * * * * *").unwrap();
        assert_eq!(
            shortest_interval(&every_second, chrono_tz::UTC, start, 8),
            Some(chrono::Duration::seconds(1))
        );

        // Irregular schedule: the tightest pair wins
        let mixed = parse_cron_expression("0 0,10,45 * * * *").unwrap();
        assert_eq!(
            shortest_interval(&mixed, chrono_tz::UTC, start, 8),
            Some(chrono::Duration::minutes(10))
        );

        assert_eq!(shortest_interval(&every_second, chrono_tz::UTC, start, 1), None);
    }

    #[test]
    fn test_parse_valid_cron_expression() {
        // Valid cron expression with second precision
        let result = parse_cron_expression("0 0 12 * * * *");
        assert!(result.is_ok());
    }

    #[test]
    fn test_parse_invalid_cron_expression() {
        let result = parse_cron_expression("invalid");
        assert!(result.is_err());
        assert!(parse_cron_expression("* * * *").is_err());
        assert!(parse_cron_expression("61 * * * * *").is_err());
    }

    #[test]
    fn test_quartz_question_mark_is_accepted() {
        let schedule = parse_cron_expression("0 * * * * ?").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 30).unwrap();
        let next = next_fire_after(&schedule, default_timezone(), after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 10, 1, 0).unwrap());
    }

    #[test]
    fn test_five_field_expression_gets_seconds() {
        assert_eq!(
            normalize_cron_expression("*/5 * * * *").unwrap(),
            "0 */5 * * * *"
        );
    }

    #[test]
    fn test_five_field_day_of_week_translation() {
        assert_eq!(normalize_cron_expression("0 9 * * 1-5").unwrap(), "0 0 9 * * 2-6");
        assert_eq!(normalize_cron_expression("0 9 * * 0").unwrap(), "0 0 9 * * 1");
        assert_eq!(normalize_cron_expression("0 9 * * 7").unwrap(), "0 0 9 * * 1");
        assert_eq!(normalize_cron_expression("0 9 * * 5-7").unwrap(), "0 0 9 * * 6-7,1");
        assert_eq!(normalize_cron_expression("0 9 * * 0-7").unwrap(), "0 0 9 * * 1-7");
        assert_eq!(normalize_cron_expression("0 9 * * MON").unwrap(), "0 0 9 * * MON");
        assert!(normalize_cron_expression("0 9 * * 8").is_err());
    }

    #[test]
    fn test_weekday_schedule_skips_weekend() {
        let schedule = parse_cron_expression("0 9 * * 1-5").unwrap();
        // 2024-01-06 is a Saturday
        let after = Utc.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).unwrap();
        let next = next_fire_after(&schedule, default_timezone(), after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_expression_without_future_fire_time() {
        let result = validate_cron_expression("0 0 0 1 1 ? 2001", default_timezone());
        assert!(matches!(result, Err(ScheduleError::NoNextExecution { .. })));
    }

    #[test]
    fn test_next_fire_is_evaluated_in_time_zone() {
        let schedule = parse_cron_expression("0 0 9 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2023, 12, 31, 12, 0, 0).unwrap();
        let next = next_fire_after(&schedule, chrono_tz::Asia::Tokyo, after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_resolve_time_zone() {
        assert_eq!(resolve_time_zone(None), chrono_tz::UTC);
        assert_eq!(resolve_time_zone(Some("  ")), chrono_tz::UTC);
        assert_eq!(
            resolve_time_zone(Some("Asia/Ho_Chi_Minh")),
            chrono_tz::Asia::Ho_Chi_Minh
        );
        assert_eq!(
            resolve_time_zone(Some("Pacific Standard Time")),
            chrono_tz::America::Los_Angeles
        );
        assert_eq!(resolve_time_zone(Some("Nowhere/Special")), chrono_tz::UTC);
    }
}
