use std::fmt::Display;
use std::time::Duration;

/// Fixed-attempt, fixed-delay retry for hardware calls that fail spuriously
/// when another process holds the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

#[derive(thiserror::Error, Debug)]
#[error("{operation} failed after {attempts} attempts: {last}")]
pub struct RetryError<E> {
    pub operation: String,
    pub attempts: u32,
    pub last: E,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(4, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    pub const fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn run<T, E, F>(&self, operation: &str, mut f: F) -> Result<T, RetryError<E>>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= attempts => {
                    return Err(RetryError {
                        operation: operation.to_string(),
                        attempts,
                        last: err,
                    });
                }
                Err(err) => {
                    log::warn!("{operation} failed (attempt {attempt}/{attempts}): {err}");
                    if !self.delay.is_zero() {
                        std::thread::sleep(self.delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}
