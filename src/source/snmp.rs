use std::time::{Duration, Instant};

use crate::monitor::{InterfaceCounters, MetricsProvider};
use crate::net::snmp::{self, IF_IN_OCTETS, IF_OUT_OCTETS, RECV_TIMEOUT, SNMP_PORT};

use super::rate::{RateTracker, Rates};
use super::stats::Stats;
use super::{format, HandlerDescriptor, SourceError, SourceHandler};

pub(super) static DESCRIPTOR: HandlerDescriptor = HandlerDescriptor {
    name: "snmp",
    unit: "B/s",
    is_dual: true,
    max_scale: 0.0,
    init,
    format: format::rate,
    format_dual: Some(format::rate_pair),
};

#[derive(Debug, PartialEq, Eq)]
struct Agent {
    host: String,
    port: u16,
    community: String,
    if_index: u32,
}

/// Throughput of a remote interface, from `ifInOctets`/`ifOutOctets`.
struct SnmpSource {
    agent: Agent,
    timeout: Duration,
    tracker: RateTracker,
}

/// Parse `<host>,<community>,<ifIndex>`.
fn parse_target(target: &str) -> Result<Agent, SourceError> {
    let parts: Vec<&str> = target.split(',').map(str::trim).collect();
    let [host, community, if_index, ..] = parts.as_slice() else {
        return Err(SourceError::invalid("snmp", target, "expected <host>,<community>,<ifIndex>"));
    };
    if host.is_empty() || community.is_empty() {
        return Err(SourceError::invalid("snmp", target, "empty host or community"));
    }
    let if_index = if_index
        .parse()
        .map_err(|_| SourceError::invalid("snmp", target, "ifIndex is not a number"))?;
    Ok(Agent {
        host: host.to_string(),
        port: SNMP_PORT,
        community: community.to_string(),
        if_index,
    })
}

fn init(target: &str, _provider: Box<dyn MetricsProvider>) -> Result<Box<dyn SourceHandler>, SourceError> {
    Ok(Box::new(SnmpSource {
        agent: parse_target(target)?,
        timeout: RECV_TIMEOUT,
        tracker: RateTracker::new(),
    }))
}

impl SnmpSource {
    fn counter(&self, column: u32) -> Result<u32, SourceError> {
        let addr = snmp::resolve(&self.agent.host, self.agent.port)?;
        let oid = snmp::if_table_oid(column, self.agent.if_index);
        Ok(snmp::get_counter32_from(addr, &self.agent.community, &oid, self.timeout)?)
    }

    /// Both GETs must succeed for the tick to count.
    fn sample(&mut self) -> Result<Rates, SourceError> {
        let in_octets = self.counter(IF_IN_OCTETS)?;
        let out_octets = self.counter(IF_OUT_OCTETS)?;
        let counters = InterfaceCounters { in_octets, out_octets };
        Ok(self.tracker.update(counters, Instant::now()))
    }
}

impl SourceHandler for SnmpSource {
    fn collect(&mut self) -> Result<f64, SourceError> {
        self.sample().map(|rates| rates.combined())
    }

    fn collect_dual(&mut self) -> Result<(f64, f64), SourceError> {
        self.sample().map(|rates| (rates.inbound, rates.outbound))
    }

    fn stats(&self) -> Stats {
        self.tracker.stats()
    }
}
