use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Random jitter (`0..=jitter_max_ms`) added to each backoff sleep.
    pub jitter_max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(200),
            jitter_max_ms: 5,
        }
    }
}

fn compute_backoff_delay(cfg: &BackoffConfig, attempt: usize) -> Duration {
    let shift = u32::try_from(attempt.min(16)).unwrap_or(16_u32);
    let pow2 = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
    let base_ms = u64::try_from(cfg.base_delay.as_millis()).unwrap_or(u64::MAX);
    let mut ms = base_ms.saturating_mul(pow2);
    let max_ms = u64::try_from(cfg.max_delay.as_millis()).unwrap_or(u64::MAX);
    if ms > max_ms {
        ms = max_ms;
    }
    let jitter = if cfg!(test) || cfg.jitter_max_ms == 0 {
        0
    } else {
        let range = cfg.jitter_max_ms.saturating_add(1);
        if range == 0 {
            0
        } else {
            rand::random::<u64>() % range
        }
    };
    Duration::from_millis(ms.saturating_add(jitter))
}

/// Poll `op` until it yields `Some`, an error, or `timeout` runs out.
///
/// `op` is always tried at least once. Between attempts the thread sleeps with exponential
/// backoff + jitter, never past the deadline. Returns `Ok(None)` on timeout.
pub fn poll_until<T>(
    timeout: Duration,
    cfg: &BackoffConfig,
    mut op: impl FnMut() -> eyre::Result<Option<T>>,
) -> eyre::Result<Option<T>> {
    let deadline = Instant::now() + timeout;
    let mut attempt = 0_usize;
    loop {
        if let Some(v) = op()? {
            return Ok(Some(v));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        let d = compute_backoff_delay(cfg, attempt).min(deadline - now);
        std::thread::sleep(d);
        attempt = attempt.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let cfg = BackoffConfig {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            jitter_max_ms: 0,
        };
        assert_eq!(compute_backoff_delay(&cfg, 0), Duration::from_millis(10));
        assert_eq!(compute_backoff_delay(&cfg, 1), Duration::from_millis(20));
        assert_eq!(compute_backoff_delay(&cfg, 2), Duration::from_millis(40));
        assert_eq!(compute_backoff_delay(&cfg, 3), Duration::from_millis(50));
        assert_eq!(compute_backoff_delay(&cfg, 64), Duration::from_millis(50));
    }

    #[test]
    fn returns_first_success() -> eyre::Result<()> {
        let mut calls = 0_u32;
        let out = poll_until(Duration::from_secs(5), &BackoffConfig::default(), || {
            calls += 1;
            Ok((calls == 3).then_some(calls))
        })?;
        assert_eq!(out, Some(3_u32));
        Ok(())
    }

    #[test]
    fn gives_up_at_the_deadline() -> eyre::Result<()> {
        let started = Instant::now();
        let out: Option<()> =
            poll_until(Duration::from_millis(30), &BackoffConfig::default(), || Ok(None))?;
        assert!(out.is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
        Ok(())
    }

    #[test]
    fn errors_stop_polling() {
        let mut calls = 0_u32;
        let res: eyre::Result<Option<()>> =
            poll_until(Duration::from_secs(5), &BackoffConfig::default(), || {
                calls += 1;
                eyre::bail!("broken")
            });
        assert!(res.is_err());
        assert_eq!(calls, 1);
    }
}
