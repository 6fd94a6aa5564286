use std::time::Duration;

use crate::mq::backoff::Backoff;

#[test]
fn test_delay_doubles_until_ceiling() {
    let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000));
    let delays: Vec<u64> = (0..7).map(|n| backoff.delay(n).as_millis() as u64).collect();
    assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000, 1000]);
}

#[test]
fn test_huge_attempt_does_not_overflow() {
    let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(30));
    assert_eq!(backoff.delay(64), Duration::from_secs(30));
    assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(30));
}

#[test]
fn test_ceiling_below_initial_is_raised() {
    let backoff = Backoff::new(Duration::from_millis(500), Duration::from_millis(100));
    assert_eq!(backoff.max(), Duration::from_millis(500));
    assert_eq!(backoff.delay(0), Duration::from_millis(500));
    assert_eq!(backoff.delay(3), Duration::from_millis(500));
}
