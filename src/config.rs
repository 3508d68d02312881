use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::net::{IpAddr, SocketAddr};

use crate::metadata::TaskInfo;
use crate::resolver::SelfRef;

/// Container name conventionally given to the endpoints service.
pub const DEFAULT_SELF_NAME: &str = "ecs-local-endpoints";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub bind_ip: IpAddr,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_name: Option<String>,
    pub container_instance_tags: String,
    pub task_tags: String,
    pub cluster: String,
    pub task_arn: String,
    pub family: String,
    /// Env values that look numeric arrive as numbers; keep them as text.
    #[serde(deserialize_with = "string_or_number")]
    pub revision: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::from([0, 0, 0, 0]),
            port: 80,
            // In a Docker container, the hostname is typically the short container ID.
            self_id: std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()),
            self_name: Some(DEFAULT_SELF_NAME.into()),
            container_instance_tags: String::new(),
            task_tags: String::new(),
            cluster: "default".into(),
            task_arn: String::new(),
            family: String::new(),
            revision: "1".into(),
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::figment()
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
    }

    /// Defaults, then files, then `ENDPOINTS_*`, then the well-known
    /// unprefixed variables containers are usually launched with.
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("endpoints.toml"))
            .merge(Json::file("endpoints.json"))
            .merge(Env::prefixed("ENDPOINTS_"))
            .merge(Env::raw().only(&["CONTAINER_INSTANCE_TAGS", "TASK_TAGS", "TASK_ARN"]))
            .merge(Env::raw().only(&["CLUSTER_ARN"]).map(|_| "cluster".into()))
            .merge(Env::raw().only(&["TASK_DEFINITION_FAMILY"]).map(|_| "family".into()))
            .merge(Env::raw().only(&["TASK_DEFINITION_REVISION"]).map(|_| "revision".into()))
            .merge(Env::raw().only(&["ECS_LOCAL_METADATA_PORT"]).map(|_| "port".into()))
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    pub fn self_ref(&self) -> SelfRef {
        SelfRef::new(self.self_id.clone(), self.self_name.clone())
    }

    pub fn task_info(&self) -> TaskInfo {
        TaskInfo {
            cluster: self.cluster.clone(),
            task_arn: self.task_arn.clone(),
            family: self.family.clone(),
            revision: self.revision.clone(),
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Unsigned(u64),
        Signed(i64),
        Float(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Unsigned(n) => n.to_string(),
        Raw::Signed(n) => n.to_string(),
        Raw::Float(n) => n.to_string(),
    })
}
