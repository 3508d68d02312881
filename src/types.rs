//! Data structures used throughout the endpoints daemon.
//!
//! [`Container`] is the canonical, read-only view of a Docker container
//! that the resolver and the metadata builders work with.  It is produced
//! once per snapshot from bollard's [`ContainerSummary`], so the daemon's
//! representation quirks (the leading `/` on names, optional fields, empty
//! IP strings for unattached endpoints) never reach comparison code.

use std::collections::BTreeMap;

use bollard::models::{ContainerSummary, EndpointSettings};

/// A container as seen in a point-in-time snapshot of the Docker daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Container {
    /// Full (long) container ID.  Short IDs are prefixes of this value.
    pub id: String,
    /// Human-assigned aliases without the daemon's `/` prefix.
    pub names: Vec<String>,
    /// Network name -> IP address assigned on that network.
    pub networks: BTreeMap<String, String>,
    pub image: String,
    pub image_id: String,
    pub labels: BTreeMap<String, String>,
    /// Raw Docker state, e.g. `running` or `exited`.
    pub state: String,
    /// Creation time in seconds since the unix epoch.
    pub created: i64,
}

impl Container {
    /// The primary name, falling back to the short ID for unnamed containers.
    pub fn name(&self) -> &str {
        self.names
            .first()
            .map(String::as_str)
            .unwrap_or_else(|| short_id(&self.id))
    }

    /// Value of a label, if present.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn has_name(&self, name: &str) -> bool {
        let name = normalize_name(name);
        self.names.iter().any(|n| n == name)
    }
}

/// Strip the path-style prefix Docker puts in front of container names.
pub fn normalize_name(name: &str) -> &str {
    name.trim_start_matches('/')
}

/// Length of the short form Docker prints for container IDs.
pub const SHORT_ID_LEN: usize = 12;

pub fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

impl TryFrom<ContainerSummary> for Container {
    type Error = MissingId;

    fn try_from(summary: ContainerSummary) -> Result<Self, Self::Error> {
        let id = summary.id.filter(|id| !id.is_empty()).ok_or(MissingId)?;

        let names = summary
            .names
            .unwrap_or_default()
            .iter()
            .map(|n| normalize_name(n).to_string())
            .filter(|n| !n.is_empty())
            .collect();

        let networks = summary
            .network_settings
            .and_then(|s| s.networks)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(name, endpoint)| endpoint_ip(&endpoint).map(|ip| (name, ip)))
            .collect();

        Ok(Container {
            id,
            names,
            networks,
            image: summary.image.unwrap_or_default(),
            image_id: summary.image_id.unwrap_or_default(),
            labels: summary.labels.unwrap_or_default().into_iter().collect(),
            state: summary.state.unwrap_or_default(),
            created: summary.created.unwrap_or_default(),
        })
    }
}

/// A container summary came back from the daemon without an ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("container summary has no id")]
pub struct MissingId;

fn endpoint_ip(endpoint: &EndpointSettings) -> Option<String> {
    if let Some(ipv4) = &endpoint.ip_address {
        if !ipv4.is_empty() {
            return Some(ipv4.clone());
        }
    }
    if let Some(ipv6) = &endpoint.global_ipv6_address {
        if !ipv6.is_empty() {
            return Some(ipv6.clone());
        }
    }
    None
}

#[cfg(test)]
impl Container {
    pub fn named(name: &str, id: &str) -> Self {
        Container {
            id: id.to_string(),
            names: vec![name.to_string()],
            state: "running".to_string(),
            ..Default::default()
        }
    }

    pub fn with_network(mut self, network: &str, ip: &str) -> Self {
        self.networks.insert(network.to_string(), ip.to_string());
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }
}
