//! Pacing of polling loops

use std::thread;
use std::time::Duration;

use crate::environment::Polling;

/// An endless stream of delays, growing by a constant factor until they reach a ceiling.
///
/// Once the ceiling is reached it is returned from then on.
#[derive(Debug, Clone)]
pub(crate) struct ExponentialBackoff {
    curr: Duration,
    max: Duration,
    factor: u32,
}

impl ExponentialBackoff {
    pub(crate) fn new(start: Duration, max: Duration, factor: u32) -> ExponentialBackoff {
        ExponentialBackoff {
            curr: start.min(max),
            max,
            factor,
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let delay = self.curr;
        self.curr = self
            .curr
            .checked_mul(self.factor)
            .map_or(self.max, |next| next.min(self.max));
        Some(delay)
    }
}

/// Paces a loop that repeatedly tests outstanding requests: the first few pauses only yield the
/// thread, later ones sleep for exponentially growing delays.
#[derive(Debug)]
pub(crate) struct Poller {
    spins: u32,
    backoff: ExponentialBackoff,
}

impl Poller {
    pub(crate) fn new(polling: Polling) -> Poller {
        Poller {
            spins: polling.spins,
            backoff: ExponentialBackoff::new(polling.initial, polling.max, polling.factor),
        }
    }

    /// Give other ranks a chance to make progress before the next pass.
    pub(crate) fn pause(&mut self) {
        if self.spins > 0 {
            self.spins -= 1;
            thread::yield_now();
        } else if let Some(delay) = self.backoff.next() {
            thread::sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_until_capped() {
        let delays: Vec<_> = ExponentialBackoff::new(
            Duration::from_micros(1),
            Duration::from_micros(10),
            3,
        )
        .take(5)
        .collect();
        assert_eq!(
            delays,
            [1, 3, 9, 10, 10].map(Duration::from_micros).to_vec()
        );
    }

    #[test]
    fn start_above_ceiling_is_capped() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_secs(5), Duration::from_millis(1), 2);
        assert_eq!(backoff.next(), Some(Duration::from_millis(1)));
    }

    #[test]
    fn poller_spins_before_sleeping() {
        let mut poller = Poller::new(Polling {
            spins: 2,
            initial: Duration::from_micros(1),
            max: Duration::from_micros(2),
            factor: 2,
        });
        poller.pause();
        poller.pause();
        assert_eq!(poller.spins, 0);
        poller.pause();
        assert_eq!(poller.backoff.next(), Some(Duration::from_micros(2)));
    }
}
