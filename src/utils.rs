use std::time::Duration;

use chrono::FixedOffset;

pub fn parse_duration(h_time: &str) -> eyre::Result<Duration> {
    Ok(humantime::parse_duration(h_time.trim())?)
}

/// Accepts `Z`, `UTC`, `+03:30`, `-0500` or `+3`.
pub fn parse_utc_offset(value: &str) -> eyre::Result<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| eyre::eyre!("invalid utc offset"));
    }

    let (sign, rest) = if let Some(rest) = value.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = value.strip_prefix('-') {
        (-1, rest)
    } else {
        return Err(eyre::eyre!("utc offset '{}' must start with + or -", value));
    };

    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 && rest.is_ascii() => rest.split_at(2),
        None => (rest, "0"),
    };

    let hours: i32 = hours
        .parse()
        .map_err(|_| eyre::eyre!("invalid hours in utc offset '{}'", value))?;
    let minutes: i32 = minutes
        .parse()
        .map_err(|_| eyre::eyre!("invalid minutes in utc offset '{}'", value))?;
    if hours < 0 || !(0..60).contains(&minutes) {
        return Err(eyre::eyre!("utc offset '{}' is malformed", value));
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| eyre::eyre!("utc offset '{}' is out of range", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_offsets() {
        let secs = |s: &str| parse_utc_offset(s).unwrap().local_minus_utc();
        assert_eq!(secs("Z"), 0);
        assert_eq!(secs("UTC"), 0);
        assert_eq!(secs("+03:30"), 12_600);
        assert_eq!(secs("-0500"), -18_000);
        assert_eq!(secs("+3"), 10_800);
    }

    #[test]
    fn rejects_bad_offsets() {
        assert!(parse_utc_offset("03:30").is_err());
        assert!(parse_utc_offset("+03:75").is_err());
        assert!(parse_utc_offset("+30:00").is_err());
        assert!(parse_utc_offset("+ab").is_err());
    }

    #[test]
    fn parses_human_durations() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("1m 30s").unwrap(), Duration::from_secs(90));
        assert!(parse_duration("soon").is_err());
    }
}
