use crate::types::Container;
use anyhow::Result;
use async_trait::async_trait;

pub mod docker;
pub use docker::DockerRuntime;

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Fetch a point-in-time list of the running containers, normalized.
    async fn snapshot(&self) -> Result<Vec<Container>>;
}
