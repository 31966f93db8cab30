use sysinfo::Networks;

use super::ProviderError;

/// Cumulative interface byte counters, truncated to 32 bits the way an SNMP
/// `Counter32` would report them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceCounters {
    pub in_octets: u32,
    pub out_octets: u32,
}

/// Monitors network interfaces through `sysinfo`
pub struct NetworkMonitor {
    networks: Networks,
}

impl NetworkMonitor {
    pub fn new() -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
        }
    }

    /// Read the counters of `name`, rescanning the interface list once if the
    /// interface is not known yet (hotplugged devices, late VPN tunnels).
    pub fn counters(&mut self, name: &str) -> Result<InterfaceCounters, ProviderError> {
        self.networks.refresh();

        if !self.networks.list().contains_key(name) {
            self.networks.refresh_list();
        }

        let data = self
            .networks
            .list()
            .get(name)
            .ok_or_else(|| ProviderError::UnknownInterface(name.to_string()))?;

        Ok(InterfaceCounters {
            in_octets: data.total_received() as u32,
            out_octets: data.total_transmitted() as u32,
        })
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}
