use super::ContainerRuntime;
use crate::types::Container;
use anyhow::Result;
use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::Docker;
use log::{debug, warn};

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self> {
        // Connect to the local Docker daemon using default settings.
        // This handles unix socket on Linux and DOCKER_HOST when set.
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn snapshot(&self) -> Result<Vec<Container>> {
        let opts = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let summaries = self.docker.list_containers(Some(opts)).await?;

        let mut containers = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let names = summary.names.clone();
            match Container::try_from(summary) {
                Ok(c) => containers.push(c),
                Err(e) => warn!("Skipping container {:?}: {}", names, e),
            }
        }
        debug!("Docker snapshot holds {} containers", containers.len());
        Ok(containers)
    }
}
