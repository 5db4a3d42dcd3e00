use std::collections::HashMap;

use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::secret::{
    ContainerInspectResponse, HostConfig, RestartPolicy, RestartPolicyNameEnum,
};
use bollard::Docker;
use futures_util::stream::StreamExt;
use thiserror::Error;
use tracing::{debug, warn};

use super::types::Config;

#[derive(Debug, Error)]
pub enum DockerError {
    #[error("docker client error: {0}")]
    Client(#[source] bollard::errors::Error),

    #[error("error pulling image {image}: {source}")]
    ImagePull {
        image: String,
        source: bollard::errors::Error,
    },

    #[error("error creating container {name}: {source}")]
    ContainerCreate {
        name: String,
        source: bollard::errors::Error,
    },

    #[error("error starting container {id}: {source}")]
    ContainerStart {
        id: String,
        source: bollard::errors::Error,
    },

    #[error("error stopping container {id}: {source}")]
    ContainerStop {
        id: String,
        source: bollard::errors::Error,
    },

    #[error("error removing container {id}: {source}")]
    ContainerRemove {
        id: String,
        source: bollard::errors::Error,
    },

    #[error("error inspecting container {id}: {source}")]
    ContainerInspect {
        id: String,
        source: bollard::errors::Error,
    },
}

/// Outcome of a successful run or stop against the engine.
#[derive(Debug, Clone)]
pub struct DockerResult {
    pub action: String,
    pub container_id: String,
}

/// The one component that talks to the container engine. Everything else
/// treats it as an opaque effect.
#[derive(Debug, Clone)]
pub struct DockerClient {
    client: Docker,
    config: Config,
}

impl DockerClient {
    pub fn new(config: Config) -> Result<Self, DockerError> {
        let client = Docker::connect_with_unix_defaults().map_err(DockerError::Client)?;
        Ok(DockerClient { client, config })
    }

    /// Pulls the image, creates and starts the container, then streams its
    /// startup logs to stdout. Log streaming is best-effort; every earlier
    /// step propagates its engine error unchanged.
    pub async fn run(&self) -> Result<DockerResult, DockerError> {
        debug!(image = %self.config.image, "pulling image");

        let mut pull = self.client.create_image(
            Some(CreateImageOptions {
                from_image: self.config.image.clone(),
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(progress) = pull.next().await {
            match progress {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(image = %self.config.image, %status, "pull progress");
                    }
                }
                Err(source) => {
                    return Err(DockerError::ImagePull {
                        image: self.config.image.clone(),
                        source,
                    })
                }
            }
        }

        let restart_policy_name = match self.config.restart_policy.as_str() {
            "always" => RestartPolicyNameEnum::ALWAYS,
            "unless-stopped" => RestartPolicyNameEnum::UNLESS_STOPPED,
            "on-failure" => RestartPolicyNameEnum::ON_FAILURE,
            _ => RestartPolicyNameEnum::NO,
        };

        let host_config = HostConfig {
            memory: Some(self.config.memory),
            nano_cpus: Some((self.config.cpu * 1_000_000_000.0) as i64),
            restart_policy: Some(RestartPolicy {
                name: Some(restart_policy_name),
                maximum_retry_count: None,
            }),
            publish_all_ports: Some(true),
            ..Default::default()
        };

        let container_config = ContainerConfig {
            image: Some(self.config.image.clone()),
            tty: Some(false),
            env: Some(self.config.env.clone()),
            exposed_ports: Some(
                self.config
                    .exposed_ports
                    .iter()
                    .map(|port| (port.clone(), HashMap::new()))
                    .collect(),
            ),
            host_config: Some(host_config),
            ..Default::default()
        };

        let created = self
            .client
            .create_container(
                Some(CreateContainerOptions {
                    name: self.config.name.clone(),
                    ..Default::default()
                }),
                container_config,
            )
            .await
            .map_err(|source| DockerError::ContainerCreate {
                name: self.config.name.clone(),
                source,
            })?;

        self.client
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|source| DockerError::ContainerStart {
                id: created.id.clone(),
                source,
            })?;

        debug!(container_id = %created.id, name = %self.config.name, "container started");

        let mut logs = self.client.logs(
            &created.id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(line) => print!("{line}"),
                Err(err) => {
                    warn!(container_id = %created.id, error = %err, "streaming container logs failed");
                    break;
                }
            }
        }

        Ok(DockerResult {
            action: "start".to_string(),
            container_id: created.id,
        })
    }

    /// Stops the container, then removes it together with its anonymous
    /// volumes. Either failure propagates.
    pub async fn stop(&self, container_id: &str) -> Result<DockerResult, DockerError> {
        debug!(%container_id, "attempting to stop container");

        self.client
            .stop_container(container_id, None::<StopContainerOptions>)
            .await
            .map_err(|source| DockerError::ContainerStop {
                id: container_id.to_string(),
                source,
            })?;

        self.client
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    v: true,
                    force: false,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|source| DockerError::ContainerRemove {
                id: container_id.to_string(),
                source,
            })?;

        Ok(DockerResult {
            action: "stop".to_string(),
            container_id: container_id.to_string(),
        })
    }

    /// Snapshot of the container's runtime state. A missing container
    /// surfaces as an error.
    pub async fn inspect(
        &self,
        container_id: &str,
    ) -> Result<ContainerInspectResponse, DockerError> {
        self.client
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|source| DockerError::ContainerInspect {
                id: container_id.to_string(),
                source,
            })
    }
}
