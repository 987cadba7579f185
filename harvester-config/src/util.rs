use std::time::Duration;

/// Reads a variable, treating blank values as unset.
pub fn string_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Durations are written the humantime way: `250ms`, `10s`, `7days`.
pub fn parse_duration(raw: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(raw.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn humantime_durations() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration(" 250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(
            parse_duration("7days").unwrap(),
            Duration::from_secs(7 * 24 * 60 * 60)
        );
        assert!(parse_duration("soon").is_err());
    }
}
