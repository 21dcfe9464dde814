use std::time::Duration;

pub const LOGGER_ENV: &str = "RUST_LOG";
pub const CONFIG_ENV: &str = "RUST_CONFIG";
pub const LOGS_ENV: &str = "LOGS_FOLDER";

pub const FORMHUB_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

// Hub defaults
pub const QUEUE_CAPACITY: usize = 256;
pub const INBOX_CAPACITY: usize = 1024;
pub const MAX_MESSAGE_SIZE: usize = 512;
pub const PONG_WAIT: Duration = Duration::from_secs(60);
pub const WRITE_WAIT: Duration = Duration::from_secs(10);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Liveness probes go out at 9/10 of the read deadline.
pub const fn ping_period(pong_wait: Duration) -> Duration {
    Duration::from_millis(pong_wait.as_millis() as u64 * 9 / 10)
}

#[cfg(test)]
#[test]
fn ping_period_is_below_read_deadline() {
    assert_eq!(ping_period(PONG_WAIT), Duration::from_secs(54));
    assert!(ping_period(Duration::from_millis(10)) < Duration::from_millis(10));
}
