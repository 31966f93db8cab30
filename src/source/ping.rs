use std::time::{Duration, Instant};

use crate::monitor::MetricsProvider;
use crate::net::icmp::{self, PingError, Pinger};

use super::stats::{RunningStats, Stats};
use super::{format, HandlerDescriptor, SourceError, SourceHandler};

pub(super) static DESCRIPTOR: HandlerDescriptor = HandlerDescriptor {
    name: "ping",
    unit: "ms",
    is_dual: false,
    max_scale: 0.0,
    init,
    format: format::millis,
    format_dual: None,
};

/// Delay between attempts to resolve the host and open the socket.
const SETUP_RETRY: Duration = Duration::from_secs(30);

type Opener = fn(&str, Duration) -> Result<Pinger, PingError>;

/// Round-trip time to one host.
///
/// Resolution or socket failures never fail creation; the session is
/// retried on a fixed cadence from `collect`.
struct PingSource {
    host: String,
    open: Opener,
    session: Option<Pinger>,
    last_attempt: Instant,
    setup_failures: u32,
    stats: RunningStats,
}

fn init(target: &str, _provider: Box<dyn MetricsProvider>) -> Result<Box<dyn SourceHandler>, SourceError> {
    let host = target.trim();
    if host.is_empty() {
        return Err(SourceError::invalid("ping", target, "empty host"));
    }
    Ok(Box::new(PingSource::start(host, Pinger::new)))
}

impl PingSource {
    fn start(host: &str, open: Opener) -> Self {
        let mut source = PingSource {
            host: host.to_string(),
            open,
            session: None,
            last_attempt: Instant::now(),
            setup_failures: 0,
            stats: RunningStats::new(),
        };
        source.connect();
        source
    }

    fn connect(&mut self) {
        self.last_attempt = Instant::now();
        match (self.open)(&self.host, icmp::DEFAULT_TIMEOUT) {
            Ok(pinger) => {
                tracing::debug!(host = %self.host, target = %pinger.target(), "ping session ready");
                self.setup_failures = 0;
                self.session = Some(pinger);
            }
            Err(e) => {
                self.setup_failures += 1;
                if self.setup_failures == 1 {
                    tracing::warn!(host = %self.host, error = %e, "ping setup failed, retrying every {}s", SETUP_RETRY.as_secs());
                } else {
                    tracing::debug!(host = %self.host, error = %e, attempts = self.setup_failures, "ping setup still failing");
                }
                self.session = None;
            }
        }
    }
}

impl SourceHandler for PingSource {
    fn collect(&mut self) -> Result<f64, SourceError> {
        if self.session.is_none() && self.last_attempt.elapsed() >= SETUP_RETRY {
            self.connect();
        }
        let pinger = self
            .session
            .as_mut()
            .ok_or_else(|| SourceError::Unresolved(self.host.clone()))?;

        let rtt = pinger.ping()?;
        self.stats.record(rtt);
        Ok(rtt)
    }

    fn stats(&self) -> Stats {
        Stats::single(&self.stats)
    }
}
