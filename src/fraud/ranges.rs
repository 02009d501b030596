//! Datacenter/VPN network ranges.
//!
//! `NetworkRanges` owns a TTL cache of CIDR blocks fetched from a
//! [`RangeSource`]. A failed refresh keeps serving the previous list.

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum RangeError {
    #[error("Invalid CIDR {0:?}")]
    InvalidCidr(String),

    #[error("Range source unavailable: {0}")]
    Unavailable(String),
}

/// An IPv4 or IPv6 network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl Cidr {
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = mask_u32(self.prefix);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = mask_u128(self.prefix);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            (IpAddr::V4(_), IpAddr::V6(ip)) => ip
                .to_ipv4_mapped()
                .is_some_and(|v4| self.contains(IpAddr::V4(v4))),
            (IpAddr::V6(_), IpAddr::V4(_)) => false,
        }
    }
}

fn mask_u32(prefix: u8) -> u32 {
    match prefix {
        0 => 0,
        p => u32::MAX << (32 - u32::from(p.min(32))),
    }
}

fn mask_u128(prefix: u8) -> u128 {
    match prefix {
        0 => 0,
        p => u128::MAX << (128 - u32::from(p.min(128))),
    }
}

impl FromStr for Cidr {
    type Err = RangeError;

    /// Parses `addr/prefix`; a bare address is a single-host network.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RangeError::InvalidCidr(s.to_string());
        let (addr, prefix) = match s.trim().split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s.trim(), None),
        };
        let network: IpAddr = addr.parse().map_err(|_| invalid())?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p.parse::<u8>().map_err(|_| invalid())?,
            None => max,
        };
        if prefix > max {
            return Err(invalid());
        }
        Ok(Self { network, prefix })
    }
}

/// Where datacenter ranges come from.
#[async_trait]
pub trait RangeSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Cidr>, RangeError>;
}

/// Fixed list, typically from configuration.
pub struct StaticRanges {
    ranges: Vec<Cidr>,
}

impl StaticRanges {
    pub fn new(ranges: Vec<Cidr>) -> Self {
        Self { ranges }
    }

    pub fn parse<S: AsRef<str>>(ranges: &[S]) -> Result<Self, RangeError> {
        let ranges = ranges
            .iter()
            .map(|r| r.as_ref().parse())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(ranges))
    }
}

#[async_trait]
impl RangeSource for StaticRanges {
    async fn fetch(&self) -> Result<Vec<Cidr>, RangeError> {
        Ok(self.ranges.clone())
    }
}

struct Cached {
    ranges: Arc<Vec<Cidr>>,
    fetched_at: Instant,
}

/// TTL cache over a [`RangeSource`].
pub struct NetworkRanges {
    source: Arc<dyn RangeSource>,
    ttl: Duration,
    cached: RwLock<Option<Cached>>,
}

impl NetworkRanges {
    pub fn new(source: Arc<dyn RangeSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// Whether `ip` falls in any known range. Refreshes a stale cache first.
    pub async fn contains(&self, ip: IpAddr) -> bool {
        self.current()
            .await
            .iter()
            .any(|range| range.contains(ip))
    }

    /// Drop the cached list; the next lookup fetches from the source.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
        debug!("Datacenter range cache invalidated");
    }

    async fn current(&self) -> Arc<Vec<Cidr>> {
        if let Some(cached) = self.cached.read().await.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Arc::clone(&cached.ranges);
            }
        }

        let mut guard = self.cached.write().await;
        // another task may have refreshed while we waited for the lock
        if let Some(cached) = guard.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Arc::clone(&cached.ranges);
            }
        }

        match self.source.fetch().await {
            Ok(ranges) => {
                debug!(count = ranges.len(), "Datacenter ranges refreshed");
                let ranges = Arc::new(ranges);
                *guard = Some(Cached {
                    ranges: Arc::clone(&ranges),
                    fetched_at: Instant::now(),
                });
                ranges
            }
            Err(e) => {
                warn!(error = %e, "Failed to refresh datacenter ranges, serving previous list");
                guard
                    .as_ref()
                    .map(|cached| Arc::clone(&cached.ranges))
                    .unwrap_or_default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSource {
        fetches: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl RangeSource for CountingSource {
        async fn fetch(&self) -> Result<Vec<Cidr>, RangeError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RangeError::Unavailable("down".to_string()));
            }
            Ok(vec!["203.0.113.0/24".parse()?])
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_cidr_contains() {
        let net: Cidr = "10.1.0.0/16".parse().unwrap();
        assert!(net.contains(ip("10.1.255.3")));
        assert!(!net.contains(ip("10.2.0.1")));

        let host: Cidr = "192.0.2.7".parse().unwrap();
        assert!(host.contains(ip("192.0.2.7")));
        assert!(!host.contains(ip("192.0.2.8")));

        let all: Cidr = "0.0.0.0/0".parse().unwrap();
        assert!(all.contains(ip("8.8.8.8")));

        let v6: Cidr = "2001:db8::/32".parse().unwrap();
        assert!(v6.contains(ip("2001:db8:1::1")));
        assert!(!v6.contains(ip("10.1.0.1")));
    }

    #[test]
    fn test_mapped_ipv4_matches_v4_range() {
        let net: Cidr = "10.0.0.0/8".parse().unwrap();
        assert!(net.contains(ip("::ffff:10.0.0.1")));
    }

    #[test]
    fn test_invalid_cidr() {
        assert!("10.0.0.0/33".parse::<Cidr>().is_err());
        assert!("not-an-ip/8".parse::<Cidr>().is_err());
        assert!("10.0.0.0/x".parse::<Cidr>().is_err());
    }

    #[tokio::test]
    async fn test_cache_fetches_once_within_ttl() {
        let source = Arc::new(CountingSource {
            fetches: AtomicU32::new(0),
            fail: false,
        });
        let ranges = NetworkRanges::new(source.clone(), Duration::from_secs(60));

        assert!(ranges.contains(ip("203.0.113.9")).await);
        assert!(!ranges.contains(ip("198.51.100.1")).await);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

        ranges.invalidate().await;
        assert!(ranges.contains(ip("203.0.113.9")).await);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_ttl_refetches() {
        let source = Arc::new(CountingSource {
            fetches: AtomicU32::new(0),
            fail: false,
        });
        let ranges = NetworkRanges::new(source.clone(), Duration::ZERO);
        ranges.contains(ip("203.0.113.9")).await;
        ranges.contains(ip("203.0.113.9")).await;
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_source_matches_nothing() {
        let source = Arc::new(CountingSource {
            fetches: AtomicU32::new(0),
            fail: true,
        });
        let ranges = NetworkRanges::new(source, Duration::from_secs(60));
        assert!(!ranges.contains(ip("203.0.113.9")).await);
    }
}
