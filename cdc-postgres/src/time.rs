use std::sync::LazyLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds between the Unix epoch (1970-01-01) and the Postgres epoch
/// (2000-01-01), both at midnight UTC.
const POSTGRES_EPOCH_UNIX_SECS: u64 = 946_684_800;

/// The Postgres epoch as a [`SystemTime`].
///
/// Replication protocol timestamps (standby status updates, commit
/// timestamps) are expressed as microseconds since this instant.
pub static POSTGRES_EPOCH: LazyLock<SystemTime> =
    LazyLock::new(|| UNIX_EPOCH + Duration::from_secs(POSTGRES_EPOCH_UNIX_SECS));

/// Converts a protocol timestamp (microseconds since the Postgres epoch) to
/// microseconds since the Unix epoch.
pub fn postgres_micros_to_unix_micros(micros: i64) -> i64 {
    micros + (POSTGRES_EPOCH_UNIX_SECS as i64) * 1_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_epoch_is_year_2000() {
        let elapsed = POSTGRES_EPOCH.duration_since(UNIX_EPOCH).unwrap();
        assert_eq!(elapsed.as_secs(), 946_684_800);
    }

    #[test]
    fn unix_micros_conversion() {
        assert_eq!(postgres_micros_to_unix_micros(0), 946_684_800_000_000);
        assert_eq!(postgres_micros_to_unix_micros(1_000_000), 946_684_801_000_000);
    }
}
