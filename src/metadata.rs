//! Metadata documents served to containers.
//!
//! The tag maps and task facts held here describe the instance and task the
//! service is emulating.  They are parsed once at startup and never change;
//! nothing in them is derived from the container a request resolves to.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::Serialize;

use crate::resolver::{is_self, SelfRef};
use crate::types::Container;

/// Docker Compose groups a project's containers under this label.
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

pub type Tags = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagParseError {
    #[error("tag entry {0:?} is missing '='")]
    MissingSeparator(String),
    #[error("tag entry {0:?} has an empty key")]
    EmptyKey(String),
}

/// Parse `key=value[,key=value...]`.  Empty input is an empty map; the last
/// occurrence of a duplicated key wins.
pub fn parse_tags(raw: &str) -> Result<Tags, TagParseError> {
    let mut tags = Tags::new();
    if raw.trim().is_empty() {
        return Ok(tags);
    }
    for entry in raw.split(',') {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| TagParseError::MissingSeparator(entry.to_string()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(TagParseError::EmptyKey(entry.to_string()));
        }
        tags.insert(key.to_string(), value.trim().to_string());
    }
    Ok(tags)
}

/// Task-level facts reported in task documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskInfo {
    pub cluster: String,
    pub task_arn: String,
    pub family: String,
    pub revision: String,
}

#[derive(Debug, Clone, Default)]
pub struct MetadataService {
    container_instance_tags: Tags,
    task_tags: Tags,
    task: TaskInfo,
}

impl MetadataService {
    pub fn new(
        raw_container_instance_tags: &str,
        raw_task_tags: &str,
    ) -> Result<Self, TagParseError> {
        Ok(Self {
            container_instance_tags: parse_tags(raw_container_instance_tags)?,
            task_tags: parse_tags(raw_task_tags)?,
            task: TaskInfo::default(),
        })
    }

    pub fn with_task(mut self, task: TaskInfo) -> Self {
        self.task = task;
        self
    }

    pub fn container_instance_tags(&self) -> &Tags {
        &self.container_instance_tags
    }

    pub fn task_tags(&self) -> &Tags {
        &self.task_tags
    }

    pub fn container_metadata(&self, container: &Container) -> ContainerMetadata {
        let networks = container
            .networks
            .iter()
            .map(|(network, ip)| {
                let is_v6 = matches!(ip.parse::<IpAddr>(), Ok(IpAddr::V6(_)));
                let (ipv4_addresses, ipv6_addresses) = if is_v6 {
                    (Vec::new(), vec![ip.clone()])
                } else {
                    (vec![ip.clone()], Vec::new())
                };
                NetworkMetadata {
                    network_mode: network.clone(),
                    ipv4_addresses,
                    ipv6_addresses,
                }
            })
            .collect();

        ContainerMetadata {
            docker_id: container.id.clone(),
            name: container.name().to_string(),
            docker_name: container.name().to_string(),
            image: container.image.clone(),
            image_id: container.image_id.clone(),
            labels: container.labels.clone(),
            desired_status: desired_status(&container.state).to_string(),
            known_status: known_status(&container.state).to_string(),
            created_at: container.created,
            kind: "NORMAL".to_string(),
            networks,
        }
    }

    /// Build the document for the task `caller` belongs to.  Task membership
    /// follows the Compose project label; a container without one is a task
    /// of its own.  The endpoints container is never listed.
    pub fn task_metadata(
        &self,
        containers: &[Container],
        caller: &Container,
        self_ref: &SelfRef,
        with_tags: bool,
    ) -> TaskMetadata {
        let members: Vec<ContainerMetadata> = match caller.label(COMPOSE_PROJECT_LABEL) {
            Some(project) => containers
                .iter()
                .filter(|c| c.label(COMPOSE_PROJECT_LABEL) == Some(project))
                .filter(|c| c.id == caller.id || !is_self(c, self_ref))
                .map(|c| self.container_metadata(c))
                .collect(),
            None => vec![self.container_metadata(caller)],
        };

        let running = members.iter().any(|m| m.known_status == "RUNNING");
        let status = if running { "RUNNING" } else { "STOPPED" };

        let (container_instance_tags, task_tags) = if with_tags {
            (
                Some(self.container_instance_tags.clone()),
                Some(self.task_tags.clone()),
            )
        } else {
            (None, None)
        };

        TaskMetadata {
            cluster: self.task.cluster.clone(),
            task_arn: self.task.task_arn.clone(),
            family: self.task.family.clone(),
            revision: self.task.revision.clone(),
            desired_status: status.to_string(),
            known_status: status.to_string(),
            containers: members,
            container_instance_tags,
            task_tags,
        }
    }
}

fn known_status(state: &str) -> &'static str {
    match state {
        "running" => "RUNNING",
        "created" | "restarting" => "PENDING",
        _ => "STOPPED",
    }
}

fn desired_status(state: &str) -> &'static str {
    match state {
        "running" => "RUNNING",
        _ => "STOPPED",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkMetadata {
    #[serde(rename = "NetworkMode")]
    pub network_mode: String,
    #[serde(rename = "IPv4Addresses")]
    pub ipv4_addresses: Vec<String>,
    #[serde(rename = "IPv6Addresses", skip_serializing_if = "Vec::is_empty")]
    pub ipv6_addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerMetadata {
    pub docker_id: String,
    pub name: String,
    pub docker_name: String,
    pub image: String,
    #[serde(rename = "ImageID")]
    pub image_id: String,
    pub labels: BTreeMap<String, String>,
    pub desired_status: String,
    pub known_status: String,
    /// Seconds since the unix epoch.
    pub created_at: i64,
    #[serde(rename = "Type")]
    pub kind: String,
    pub networks: Vec<NetworkMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskMetadata {
    pub cluster: String,
    #[serde(rename = "TaskARN")]
    pub task_arn: String,
    pub family: String,
    pub revision: String,
    pub desired_status: String,
    pub known_status: String,
    pub containers: Vec<ContainerMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_instance_tags: Option<Tags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_tags: Option<Tags>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!(parse_tags("a=1,b=2").unwrap(), tags(&[("a", "1"), ("b", "2")]));
        assert_eq!(parse_tags("").unwrap(), Tags::new());
        assert_eq!(parse_tags("   ").unwrap(), Tags::new());
    }

    #[test]
    fn test_parse_tags_splits_on_first_equals() {
        assert_eq!(
            parse_tags("url=http://x?a=b,empty=").unwrap(),
            tags(&[("url", "http://x?a=b"), ("empty", "")])
        );
    }

    #[test]
    fn test_parse_tags_trims_keys_and_values() {
        assert_eq!(parse_tags(" a = 1 ").unwrap(), tags(&[("a", "1")]));
        assert_eq!(
            parse_tags("a=1 , b = two words ").unwrap(),
            tags(&[("a", "1"), ("b", "two words")])
        );
        assert_eq!(
            parse_tags("  =1"),
            Err(TagParseError::EmptyKey("  =1".to_string()))
        );
    }

    #[test]
    fn test_parse_tags_last_duplicate_wins() {
        assert_eq!(parse_tags("a=1,a=2").unwrap(), tags(&[("a", "2")]));
    }

    #[test]
    fn test_parse_tags_rejects_malformed_entries() {
        assert_eq!(
            parse_tags("a=1,bad"),
            Err(TagParseError::MissingSeparator("bad".to_string()))
        );
        assert_eq!(
            parse_tags("=1"),
            Err(TagParseError::EmptyKey("=1".to_string()))
        );
        assert!(parse_tags("a=1,").is_err());
    }

    #[test]
    fn test_new_metadata_service_with_tags() {
        let service = MetadataService::new(
            "mitchell=webb,thats=numberwang",
            "hello=goodbye,get=back,come=together",
        )
        .unwrap();

        assert_eq!(
            service.container_instance_tags(),
            &tags(&[("mitchell", "webb"), ("thats", "numberwang")])
        );
        assert_eq!(
            service.task_tags(),
            &tags(&[("hello", "goodbye"), ("get", "back"), ("come", "together")])
        );
    }

    #[test]
    fn test_new_metadata_service_fails_fast() {
        assert!(MetadataService::new("ok=1", "broken").is_err());
        assert!(MetadataService::new("broken", "").is_err());
    }

    #[test]
    fn test_container_metadata_document() {
        let service = MetadataService::default();
        let container = Container::named("web", "e18ab3d25b38c8b6")
            .with_network("bridge", "172.17.0.2")
            .with_label("owner", "me");

        let doc = service.container_metadata(&container);
        assert_eq!(doc.known_status, "RUNNING");

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["DockerId"], "e18ab3d25b38c8b6");
        assert_eq!(json["Name"], "web");
        assert_eq!(json["Labels"]["owner"], "me");
        assert_eq!(json["Networks"][0]["NetworkMode"], "bridge");
        assert_eq!(json["Networks"][0]["IPv4Addresses"][0], "172.17.0.2");
        assert!(json["Networks"][0].get("IPv6Addresses").is_none());
    }

    #[test]
    fn test_ipv6_endpoint_is_not_reported_as_ipv4() {
        let service = MetadataService::default();
        let container = Container::named("web", "e18ab3d25b38c8b6")
            .with_network("bridge", "172.17.0.2")
            .with_network("v6only", "fd00::5");

        let doc = service.container_metadata(&container);
        let v6 = doc.networks.iter().find(|n| n.network_mode == "v6only").unwrap();
        assert!(v6.ipv4_addresses.is_empty());
        assert_eq!(v6.ipv6_addresses, vec!["fd00::5".to_string()]);

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["Networks"][1]["NetworkMode"], "v6only");
        assert_eq!(json["Networks"][1]["IPv4Addresses"], serde_json::json!([]));
        assert_eq!(json["Networks"][1]["IPv6Addresses"][0], "fd00::5");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(known_status("running"), "RUNNING");
        assert_eq!(known_status("created"), "PENDING");
        assert_eq!(known_status("exited"), "STOPPED");
        assert_eq!(desired_status("paused"), "STOPPED");
    }

    #[test]
    fn test_task_membership_follows_compose_project() {
        let service = MetadataService::new("", "")
            .unwrap()
            .with_task(TaskInfo {
                cluster: "default".to_string(),
                task_arn: "arn:task/1".to_string(),
                family: "project".to_string(),
                revision: "1".to_string(),
            });
        let own = SelfRef::new(None, Some("endpoints".to_string()));
        let containers = vec![
            Container::named("endpoints", "aaa").with_label(COMPOSE_PROJECT_LABEL, "project"),
            Container::named("app", "bbb").with_label(COMPOSE_PROJECT_LABEL, "project"),
            Container::named("db", "ccc").with_label(COMPOSE_PROJECT_LABEL, "project"),
            Container::named("other", "ddd").with_label(COMPOSE_PROJECT_LABEL, "elsewhere"),
        ];

        let task = service.task_metadata(&containers, &containers[1], &own, false);
        let names: Vec<&str> = task.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["app", "db"]);
        assert_eq!(task.task_arn, "arn:task/1");
        assert_eq!(task.known_status, "RUNNING");
        assert!(task.task_tags.is_none());
    }

    #[test]
    fn test_task_without_project_is_the_caller_alone() {
        let service = MetadataService::default();
        let own = SelfRef::new(None, Some("endpoints".to_string()));
        let containers = vec![Container::named("solo", "bbb"), Container::named("peer", "ccc")];

        let task = service.task_metadata(&containers, &containers[0], &own, false);
        assert_eq!(task.containers.len(), 1);
        assert_eq!(task.containers[0].name, "solo");
    }

    #[test]
    fn test_task_with_tags() {
        let service = MetadataService::new("ci=1", "task=2").unwrap();
        let own = SelfRef::default();
        let caller = Container::named("solo", "bbb");

        let task = service.task_metadata(std::slice::from_ref(&caller), &caller, &own, true);
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["ContainerInstanceTags"]["ci"], "1");
        assert_eq!(json["TaskTags"]["task"], "2");

        let task = service.task_metadata(std::slice::from_ref(&caller), &caller, &own, false);
        let json = serde_json::to_value(&task).unwrap();
        assert!(json.get("TaskTags").is_none());
    }
}
