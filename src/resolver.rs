//! Caller identification.
//!
//! Given a snapshot of every container the daemon knows about, find the one
//! container that issued a request.  Callers are named either explicitly
//! (full ID, short ID or container name) or implicitly by the source address
//! of their connection.  Address lookups are only sound on networks this
//! service is attached to: unrelated bridge networks routinely reuse the same
//! private subnet, so an address seen anywhere else is ignored.

use std::collections::BTreeSet;

use crate::types::{normalize_name, Container, SHORT_ID_LEN};

/// How the endpoints service recognises its own entry in a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelfRef {
    /// Full or short container ID, typically the `HOSTNAME` Docker assigns.
    pub id: Option<String>,
    /// Well-known container name.
    pub name: Option<String>,
}

impl SelfRef {
    pub fn new(id: Option<String>, name: Option<String>) -> Self {
        Self {
            id: id.filter(|s| !s.is_empty()),
            name: name.filter(|s| !s.is_empty()),
        }
    }

    /// IDs shorter than Docker's short form only match exactly, so a short
    /// hex-looking hostname cannot claim someone else's container.
    fn matches(&self, container: &Container) -> bool {
        if let Some(id) = &self.id {
            if container.id == *id
                || (id.len() >= SHORT_ID_LEN && container.id.starts_with(id.as_str()))
            {
                return true;
            }
        }
        match &self.name {
            Some(name) => container.has_name(name),
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// Zero or several containers matched.  Both cases are reported the same
    /// way: the caller could not be uniquely identified.
    #[error("could not uniquely identify container for {query} ({candidates} candidates)")]
    NotFound { query: String, candidates: usize },
    /// The service could not find its own container, so it has no network scope.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Find the container identified by `identifier`, or by `caller_ip` when the
/// identifier is empty.
pub fn resolve<'a>(
    containers: &'a [Container],
    self_ref: &SelfRef,
    identifier: &str,
    caller_ip: &str,
) -> Result<&'a Container, ResolveError> {
    if !identifier.is_empty() {
        return resolve_identifier(containers, identifier);
    }
    if !caller_ip.is_empty() {
        return resolve_caller_ip(containers, self_ref, caller_ip);
    }
    Err(ResolveError::NotFound {
        query: "an empty request".to_string(),
        candidates: 0,
    })
}

fn resolve_identifier<'a>(
    containers: &'a [Container],
    identifier: &str,
) -> Result<&'a Container, ResolveError> {
    let mut matches: Vec<&Container> = containers
        .iter()
        .filter(|c| c.id.starts_with(identifier))
        .collect();

    if matches.is_empty() {
        let name = normalize_name(identifier);
        matches = containers.iter().filter(|c| c.has_name(name)).collect();
    }

    exactly_one(matches, || format!("identifier {}", identifier))
}

fn resolve_caller_ip<'a>(
    containers: &'a [Container],
    self_ref: &SelfRef,
    caller_ip: &str,
) -> Result<&'a Container, ResolveError> {
    let scope = scope_set(containers, self_ref)?;

    let matches = containers
        .iter()
        .filter(|c| {
            c.networks
                .iter()
                .filter(|(network, _)| scope.contains(network.as_str()))
                .any(|(_, ip)| ip == caller_ip)
        })
        .collect();

    exactly_one(matches, || format!("caller ip {}", caller_ip))
}

/// Names of the networks the endpoints container is attached to.
pub fn scope_set<'a>(
    containers: &'a [Container],
    self_ref: &SelfRef,
) -> Result<BTreeSet<&'a str>, ResolveError> {
    if self_ref.id.is_none() && self_ref.name.is_none() {
        return Err(ResolveError::Configuration(
            "neither a self id nor a self name is configured".to_string(),
        ));
    }
    let own: Vec<&'a Container> = containers.iter().filter(|c| self_ref.matches(c)).collect();
    match own.as_slice() {
        [only] => {
            let only: &'a Container = *only;
            Ok(only.networks.keys().map(String::as_str).collect())
        }
        [] => Err(ResolveError::Configuration(format!(
            "endpoints container ({}) not found among {} containers",
            describe(self_ref),
            containers.len()
        ))),
        _ => Err(ResolveError::Configuration(format!(
            "endpoints container ({}) matches {} containers",
            describe(self_ref),
            own.len()
        ))),
    }
}

/// True when `container` is the endpoints service itself.
pub fn is_self(container: &Container, self_ref: &SelfRef) -> bool {
    self_ref.matches(container)
}

fn exactly_one<'a>(
    matches: Vec<&'a Container>,
    query: impl FnOnce() -> String,
) -> Result<&'a Container, ResolveError> {
    match matches.as_slice() {
        [only] => Ok(*only),
        _ => Err(ResolveError::NotFound {
            query: query(),
            candidates: matches.len(),
        }),
    }
}

fn describe(self_ref: &SelfRef) -> String {
    match (&self_ref.id, &self_ref.name) {
        (Some(id), Some(name)) => format!("id {} or name {}", id, name),
        (Some(id), None) => format!("id {}", id),
        (None, Some(name)) => format!("name {}", name),
        (None, None) => "unset".to_string(),
    }
}
