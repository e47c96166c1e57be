//! Bounded-concurrency gate for outbound fetches.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::config::{GovernorConfig, GovernorStats};
use super::host_state::HostState;

/// Returned when acquiring from a governor that has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rate governor is closed")]
pub struct GovernorClosed;

/// Holds one global slot and one per-host slot. Both are released on drop.
#[derive(Debug)]
pub struct GovernorPermit {
    host: String,
    _host_permit: OwnedSemaphorePermit,
    _global_permit: OwnedSemaphorePermit,
}

impl GovernorPermit {
    pub fn host(&self) -> &str {
        &self.host
    }
}

/// Caps in-flight fetches globally and per host, and paces request starts
/// on each host with a minimum delay plus random jitter.
///
/// Waiters are woken in FIFO order. The per-host slot is taken before the
/// global one, so a task queued behind a busy host never holds a global slot.
#[derive(Debug)]
pub struct RateGovernor {
    config: GovernorConfig,
    global: Arc<Semaphore>,
    hosts: RwLock<HashMap<String, HostState>>,
}

impl RateGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        let config = GovernorConfig {
            max_global: config.max_global.max(1),
            max_per_host: config.max_per_host.max(1),
            ..config
        };
        Self {
            global: Arc::new(Semaphore::new(config.max_global)),
            hosts: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// Wait for a per-host slot, the host's pacing delay, then a global slot.
    pub async fn acquire(&self, host: &str) -> Result<GovernorPermit, GovernorClosed> {
        let host_semaphore = self.host_semaphore(host).await;
        let host_permit = host_semaphore
            .acquire_owned()
            .await
            .map_err(|_| GovernorClosed)?;

        let start = {
            let spacing = self.config.min_delay + self.jitter();
            let mut hosts = self.hosts.write().await;
            let state = hosts
                .entry(host.to_string())
                .or_insert_with(|| HostState::new(self.config.max_per_host));
            state.reserve_slot(Instant::now(), spacing)
        };

        let wait = start.saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            debug!("Pacing {}: waiting {:?}", host, wait);
            tokio::time::sleep_until(start).await;
        }

        let global_permit = self
            .global
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GovernorClosed)?;

        Ok(GovernorPermit {
            host: host.to_string(),
            _host_permit: host_permit,
            _global_permit: global_permit,
        })
    }

    /// Wake every waiter with [`GovernorClosed`] and refuse new acquires.
    /// Permits already handed out stay valid until dropped.
    pub async fn close(&self) {
        self.global.close();
        let hosts = self.hosts.read().await;
        for state in hosts.values() {
            state.permits.close();
        }
    }

    /// Report a successful response; clears 403 tracking for the host.
    pub async fn report_success(&self, host: &str) {
        let mut hosts = self.hosts.write().await;
        if let Some(state) = hosts.get_mut(host) {
            state.clear_403_tracking();
        }
    }

    /// Report a 403. Returns true when enough distinct URLs on this host have
    /// been refused within the window to treat the host as blocking us.
    pub async fn report_forbidden(&self, host: &str, url: &str) -> bool {
        let mut hosts = self.hosts.write().await;
        let state = hosts
            .entry(host.to_string())
            .or_insert_with(|| HostState::new(self.config.max_per_host));

        let blocked = state.add_403(
            url,
            Instant::now(),
            self.config.forbidden_window,
            self.config.forbidden_threshold,
        );
        if blocked {
            let count = state.unique_403_count();
            state.blocks_detected += 1;
            state.clear_403_tracking();
            warn!(
                "Blocked by {} ({} unique URLs got 403 within {:?})",
                host, count, self.config.forbidden_window
            );
        } else {
            debug!(
                "403 from {} for {} ({} unique URLs in window)",
                host,
                url,
                state.unique_403_count()
            );
        }
        blocked
    }

    /// Fetches currently in flight across all hosts.
    pub fn in_flight(&self) -> usize {
        self.config
            .max_global
            .saturating_sub(self.global.available_permits())
    }

    /// Fetches currently in flight against `host`.
    pub async fn host_in_flight(&self, host: &str) -> usize {
        let hosts = self.hosts.read().await;
        hosts
            .get(host)
            .map(|s| {
                self.config
                    .max_per_host
                    .saturating_sub(s.permits.available_permits())
            })
            .unwrap_or(0)
    }

    pub async fn stats(&self) -> GovernorStats {
        let hosts = self.hosts.read().await;
        GovernorStats {
            in_flight: self.in_flight(),
            max_global: self.config.max_global,
            max_per_host: self.config.max_per_host,
            hosts_tracked: hosts.len(),
            total_requests: hosts.values().map(|s| s.total_requests).sum(),
            blocks_detected: hosts.values().map(|s| s.blocks_detected).sum(),
        }
    }

    async fn host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        {
            let hosts = self.hosts.read().await;
            if let Some(state) = hosts.get(host) {
                return state.permits.clone();
            }
        }
        let mut hosts = self.hosts.write().await;
        hosts
            .entry(host.to_string())
            .or_insert_with(|| HostState::new(self.config.max_per_host))
            .permits
            .clone()
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.config.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unpaced(max_global: usize, max_per_host: usize) -> RateGovernor {
        RateGovernor::new(
            GovernorConfig::new(max_global, max_per_host)
                .with_pacing(Duration::ZERO, Duration::ZERO),
        )
    }

    #[tokio::test]
    async fn global_cap_holds_under_contention() {
        let governor = Arc::new(unpaced(3, 10));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..24 {
            let governor = governor.clone();
            let current = current.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let host = format!("host{}.example", i % 6);
                let _permit = governor.acquire(&host).await.unwrap();
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                assert!(governor.in_flight() <= 3);
                tokio::time::sleep(Duration::from_millis(5)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
        assert_eq!(governor.in_flight(), 0);
    }

    #[tokio::test]
    async fn per_host_cap_holds() {
        let governor = Arc::new(unpaced(10, 2));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..12 {
            let governor = governor.clone();
            let current = current.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = governor.acquire("one.example").await.unwrap();
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                assert!(governor.host_in_flight("one.example").await <= 2);
                tokio::time::sleep(Duration::from_millis(5)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(governor.host_in_flight("one.example").await, 0);
    }

    #[tokio::test]
    async fn permit_released_on_drop() {
        let governor = unpaced(1, 1);
        {
            let permit = governor.acquire("a.example").await.unwrap();
            assert_eq!(permit.host(), "a.example");
            assert_eq!(governor.in_flight(), 1);
            assert_eq!(governor.host_in_flight("a.example").await, 1);
        }
        assert_eq!(governor.in_flight(), 0);
        let _again = governor.acquire("b.example").await.unwrap();
        assert_eq!(governor.stats().await.total_requests, 2);
    }

    #[tokio::test]
    async fn paces_requests_on_same_host() {
        let governor = RateGovernor::new(
            GovernorConfig::new(4, 4).with_pacing(Duration::from_millis(60), Duration::ZERO),
        );
        let started = std::time::Instant::now();
        drop(governor.acquire("slow.example").await.unwrap());
        drop(governor.acquire("slow.example").await.unwrap());
        assert!(started.elapsed() >= Duration::from_millis(55));

        // Other hosts are not delayed by slow.example's pacing.
        let other = std::time::Instant::now();
        drop(governor.acquire("fast.example").await.unwrap());
        assert!(other.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn close_wakes_waiters() {
        let governor = Arc::new(unpaced(1, 1));
        let held = governor.acquire("a.example").await.unwrap();

        let waiter = {
            let governor = governor.clone();
            tokio::spawn(async move { governor.acquire("b.example").await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        governor.close().await;

        assert_eq!(waiter.await.unwrap(), Err(GovernorClosed));
        drop(held);
    }

    #[tokio::test]
    async fn forbidden_pattern_detection() {
        let governor = unpaced(2, 2);
        assert!(!governor.report_forbidden("h.example", "https://h.example/1").await);
        assert!(!governor.report_forbidden("h.example", "https://h.example/1").await);
        assert!(!governor.report_forbidden("h.example", "https://h.example/2").await);

        // A success resets the pattern.
        governor.report_success("h.example").await;
        assert!(!governor.report_forbidden("h.example", "https://h.example/3").await);
        assert!(!governor.report_forbidden("h.example", "https://h.example/4").await);
        assert!(governor.report_forbidden("h.example", "https://h.example/5").await);
        assert_eq!(governor.stats().await.blocks_detected, 1);
    }
}
