use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch. Clocks set before 1970 read as zero.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_past_2020() {
        // 2020-01-01T00:00:00Z
        assert!(unix_millis() > 1_577_836_800_000);
    }
}
