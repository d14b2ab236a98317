// Login rate limiting
//
// Sliding window of attempt timestamps per client IP. Attempts older
// than the window never affect decisions; a successful login clears the
// client's window.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

const WINDOW: Duration = Duration::from_secs(15 * 60);
const MAX_ATTEMPTS: usize = 5;

pub struct LoginRateLimiter {
    window: Duration,
    max_attempts: usize,
    attempts: Mutex<HashMap<IpAddr, Vec<Instant>>>,
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new(WINDOW, MAX_ATTEMPTS)
    }
}

impl LoginRateLimiter {
    pub fn new(window: Duration, max_attempts: usize) -> Self {
        Self {
            window,
            max_attempts,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a login attempt from this IP is currently allowed.
    pub fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut attempts = self.attempts.lock();
        match attempts.get_mut(&ip) {
            Some(stamps) => {
                prune(stamps, now, self.window);
                stamps.len() < self.max_attempts
            }
            None => true,
        }
    }

    /// Record a failed attempt.
    pub fn record_failure(&self, ip: IpAddr) {
        let now = Instant::now();
        let mut attempts = self.attempts.lock();
        let stamps = attempts.entry(ip).or_default();
        prune(stamps, now, self.window);
        stamps.push(now);
    }

    /// A successful login clears the window.
    pub fn clear(&self, ip: IpAddr) {
        self.attempts.lock().remove(&ip);
    }

    #[cfg(test)]
    fn backdate(&self, ip: IpAddr, by: Duration) {
        let mut attempts = self.attempts.lock();
        if let Some(stamps) = attempts.get_mut(&ip) {
            for stamp in stamps.iter_mut() {
                *stamp -= by;
            }
        }
    }
}

fn prune(stamps: &mut Vec<Instant>, now: Instant, window: Duration) {
    stamps.retain(|stamp| now.duration_since(*stamp) < window);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip() -> IpAddr {
        "203.0.113.7".parse().unwrap()
    }

    #[test]
    fn five_failures_lock_the_ip() {
        let limiter = LoginRateLimiter::default();
        for _ in 0..4 {
            limiter.record_failure(ip());
            assert!(limiter.check(ip()));
        }
        limiter.record_failure(ip());
        assert!(!limiter.check(ip()));
    }

    #[test]
    fn window_expiry_unlocks() {
        let limiter = LoginRateLimiter::default();
        for _ in 0..5 {
            limiter.record_failure(ip());
        }
        assert!(!limiter.check(ip()));

        // age every attempt past the window
        limiter.backdate(ip(), WINDOW + Duration::from_secs(1));
        assert!(limiter.check(ip()));
    }

    #[test]
    fn success_clears_the_window() {
        let limiter = LoginRateLimiter::default();
        for _ in 0..5 {
            limiter.record_failure(ip());
        }
        limiter.clear(ip());
        assert!(limiter.check(ip()));
    }

    #[test]
    fn ips_are_independent() {
        let limiter = LoginRateLimiter::default();
        let other: IpAddr = "198.51.100.4".parse().unwrap();
        for _ in 0..5 {
            limiter.record_failure(ip());
        }
        assert!(!limiter.check(ip()));
        assert!(limiter.check(other));
    }
}
