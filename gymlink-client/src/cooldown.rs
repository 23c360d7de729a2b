use std::time::Duration;

use tokio::time::Instant;

/// Cancellable cooldown window
///
/// While armed, `is_cooling` is true until `window` has elapsed. Re-arming
/// restarts the window. Time is read from `tokio::time`, so a paused test
/// clock drives it, but no runtime is needed to use it.
#[derive(Debug)]
pub struct Cooldown {
    window: Duration,
    deadline: Option<Instant>,
}

impl Cooldown {
    pub fn new(window: Duration) -> Cooldown {
        Cooldown {
            window,
            deadline: None,
        }
    }

    pub fn arm(&mut self) {
        self.deadline = match self.window.is_zero() {
            true => None,
            false => Some(Instant::now() + self.window),
        };
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_cooling(&self) -> bool {
        self.deadline.map_or(false, |d| Instant::now() < d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn window_expires() {
        let mut c = Cooldown::new(Duration::from_millis(500));
        assert!(!c.is_cooling());
        c.arm();
        assert!(c.is_cooling());
        tokio::time::sleep(Duration::from_millis(499)).await;
        assert!(c.is_cooling());
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(!c.is_cooling());
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_restarts_the_window() {
        let mut c = Cooldown::new(Duration::from_millis(500));
        c.arm();
        tokio::time::sleep(Duration::from_millis(400)).await;
        c.arm();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(c.is_cooling());
        tokio::time::sleep(Duration::from_millis(101)).await;
        assert!(!c.is_cooling());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_clears_immediately() {
        let mut c = Cooldown::new(Duration::from_millis(500));
        c.arm();
        c.cancel();
        assert!(!c.is_cooling());
    }

    #[tokio::test]
    async fn zero_window_never_cools() {
        let mut c = Cooldown::new(Duration::ZERO);
        c.arm();
        assert!(!c.is_cooling());
    }

    #[test]
    fn arming_needs_no_runtime() {
        let mut c = Cooldown::new(Duration::from_secs(60));
        c.arm();
        assert!(c.is_cooling());
        c.cancel();
        assert!(!c.is_cooling());
    }
}
