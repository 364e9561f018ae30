use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc};

#[macro_export]
macro_rules! default_struct {
    (
        $(#[$struct_meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_vis:vis $field:ident : $type:ty $(= $default:expr)?
            ),* $(,)?
        }
    ) => {
        $(#[$struct_meta])*
        $vis struct $name {
            $(
                $(#[$field_meta])*
                $field_vis $field: $type
            ),*
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $(
                        $field: $crate::default_struct!(@default $($default)?)
                    ),*
                }
            }
        }
    };
    (@default) => {
        Default::default()
    };
    (@default $expr:expr) => {
        $expr
    };
}

const ABSOLUTE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%d.%m.%Y %H:%M",
];

/// Parses a relative span such as `90m`, `1h30m` or `2d`. Spans chrono
/// cannot represent yield `None`.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let mut total = Duration::zero();
    let mut digits = String::new();
    let mut seen_unit = false;

    for c in input.trim().chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let amount: i64 = digits.parse().ok()?;
        digits.clear();
        let step = match c.to_ascii_lowercase() {
            'w' => Duration::try_weeks(amount),
            'd' => Duration::try_days(amount),
            'h' => Duration::try_hours(amount),
            'm' => Duration::try_minutes(amount),
            's' => Duration::try_seconds(amount),
            _ => return None,
        }?;
        total = total.checked_add(&step)?;
        seen_unit = true;
    }

    if !digits.is_empty() || !seen_unit {
        return None;
    }
    Some(total)
}

/// Resolves a user supplied end time relative to `now`. Wall-clock inputs are
/// interpreted in `now`'s time zone; a bare `HH:MM` that already passed today
/// means tomorrow.
pub fn parse_until<Tz: TimeZone>(input: &str, now: &DateTime<Tz>) -> Option<DateTime<Utc>> {
    let input = input.trim();

    if let Some(span) = parse_duration(input) {
        return now.with_timezone(&Utc).checked_add_signed(span);
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
        return Some(parsed.with_timezone(&Utc));
    }

    if let Ok(time) = NaiveTime::parse_from_str(input, "%H:%M") {
        return next_occurrence(now, time);
    }

    ABSOLUTE_FORMATS.iter().find_map(|format| {
        let naive = NaiveDateTime::parse_from_str(input, format).ok()?;
        let local = now.timezone().from_local_datetime(&naive).earliest()?;
        Some(local.with_timezone(&Utc))
    })
}

/// The first moment strictly after `now` whose wall-clock time is `time`.
pub fn next_occurrence<Tz: TimeZone>(now: &DateTime<Tz>, time: NaiveTime) -> Option<DateTime<Utc>> {
    let today = now.date_naive().and_time(time);
    let mut candidate = now.timezone().from_local_datetime(&today).earliest()?;
    if candidate <= *now {
        let tomorrow = today.checked_add_signed(Duration::days(1))?;
        candidate = now.timezone().from_local_datetime(&tomorrow).earliest()?;
    }
    Some(candidate.with_timezone(&Utc))
}

/// Cuts `text` to at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn relative_durations_add_up() {
        assert_eq!(parse_duration("1h30m"), Some(Duration::minutes(90)));
        assert_eq!(parse_duration("2d"), Some(Duration::days(2)));
        assert_eq!(parse_duration("15"), None);
        assert_eq!(parse_duration("3x"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn oversized_spans_are_rejected() {
        let now = at("2024-03-10T12:00:00Z");

        assert_eq!(parse_duration("99999999999999w"), None);
        assert_eq!(parse_duration("99999999999999999999d"), None);
        assert_eq!(parse_until("9999999999d", &now), None);
        assert_eq!(parse_until("99999999999999w", &now), None);
    }

    #[test]
    fn until_accepts_relative_and_absolute_forms() {
        let now = at("2024-03-10T12:00:00Z");

        assert_eq!(parse_until("45m", &now), Some(at("2024-03-10T12:45:00Z")));
        assert_eq!(
            parse_until("2024-03-11 08:15", &now),
            Some(at("2024-03-11T08:15:00Z"))
        );
        assert_eq!(
            parse_until("11.03.2024 08:15", &now),
            Some(at("2024-03-11T08:15:00Z"))
        );
        assert_eq!(
            parse_until("2024-03-11T08:15:00+02:00", &now),
            Some(at("2024-03-11T06:15:00Z"))
        );
        assert_eq!(parse_until("next tuesday", &now), None);
    }

    #[test]
    fn bare_time_rolls_over_to_tomorrow() {
        let now = at("2024-03-10T12:00:00Z");

        assert_eq!(parse_until("18:30", &now), Some(at("2024-03-10T18:30:00Z")));
        assert_eq!(parse_until("06:00", &now), Some(at("2024-03-11T06:00:00Z")));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("žluťoučký", 4), "žluť");
        assert_eq!(truncate_chars("short", 1024), "short");
    }
}
