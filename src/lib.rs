//! Concurrent sampling of system and network metrics.
//!
//! Every configured source (CPU, memory, load average, ICMP ping, SNMP
//! interface counters, local interface throughput, shell commands, clock)
//! runs on its own thread and feeds a fixed-size [`ringbuf::RingBuffer`]
//! that a renderer can snapshot without blocking the sampler.

pub mod app;
pub mod collector;
pub mod config;
pub mod monitor;
pub mod net;
pub mod ringbuf;
pub mod source;
