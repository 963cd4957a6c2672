/// Returns the delay before the next check of an unresolved settlement,
/// based on how long it has been unresolved.
pub fn settlement_poll_freq(
    first_seen: time::OffsetDateTime,
    now: time::OffsetDateTime,
) -> time::Duration {
    let waited = now - first_seen;
    match waited {
        d if d < time::Duration::minutes(1) => time::Duration::seconds(5),
        d if d < time::Duration::minutes(10) => time::Duration::seconds(30),
        _ => time::Duration::minutes(2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{Duration, OffsetDateTime};

    #[test]
    fn test_backoff_steps() {
        let start = OffsetDateTime::UNIX_EPOCH;
        assert_eq!(settlement_poll_freq(start, start), Duration::seconds(5));
        assert_eq!(
            settlement_poll_freq(start, start + Duration::minutes(5)),
            Duration::seconds(30)
        );
        assert_eq!(
            settlement_poll_freq(start, start + Duration::hours(1)),
            Duration::minutes(2)
        );
    }
}
