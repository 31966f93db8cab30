//! Network probes: ICMP echo and SNMP counter reads.

pub mod icmp;
pub mod snmp;

pub use icmp::{PingError, Pinger};
pub use snmp::{DecodeError, SnmpError};
