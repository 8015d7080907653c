//! Docker implementation of the container engine port

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogsOptions, RemoveContainerOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerStateStatusEnum, HealthStatusEnum, HostConfig, Mount, MountTypeEnum, PortBinding};
use bollard::network::CreateNetworkOptions;
use bollard::Docker;
use futures_util::StreamExt;
use tracing::{debug, info};

use super::{ContainerEngine, ContainerSpec, EngineError, EngineResult, EngineStatus, ExecOutput, LogTail};

/// Label identifying containers owned by this control plane
pub const MANAGED_LABEL: &str = "discopanel.managed";

/// Label carrying the owning server id
pub const SERVER_LABEL: &str = "discopanel.server-id";

/// Container data mount point (the game image's working volume)
const DATA_MOUNT: &str = "/data";

pub struct DockerEngine {
    client: Docker,
    network: String,
}

impl DockerEngine {
    /// Connect using platform defaults.
    pub fn new(network: &str) -> EngineResult<Self> {
        let client = Docker::connect_with_local_defaults().map_err(map_docker_err)?;
        Ok(Self {
            client,
            network: network.to_string(),
        })
    }

    /// Connect to an explicit socket path.
    pub fn with_socket(socket_path: &str, network: &str) -> EngineResult<Self> {
        let client = Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)
            .map_err(map_docker_err)?;
        Ok(Self {
            client,
            network: network.to_string(),
        })
    }

    pub async fn ping(&self) -> EngineResult<()> {
        self.client.ping().await.map_err(map_docker_err)?;
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> EngineResult<()> {
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.client.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            let item = result.map_err(map_docker_err)?;
            if let Some(status) = item.status {
                debug!("Pull: {}", status);
            }
        }
        Ok(())
    }
}

fn map_docker_err(err: bollard::errors::Error) -> EngineError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => EngineError::NotFound(message),
        bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message,
        } => EngineError::Conflict(message),
        other => EngineError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn create(&self, spec: &ContainerSpec) -> EngineResult<String> {
        self.pull_image(&spec.image).await?;

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let mut exposed_ports = HashMap::new();
        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        for (container_port, host_port) in &spec.port_bindings {
            let key = format!("{}/tcp", container_port);
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(host_port.to_string()),
                }]),
            );
        }

        let mounts = vec![Mount {
            target: Some(DATA_MOUNT.to_string()),
            source: Some(spec.data_dir.clone()),
            typ: Some(MountTypeEnum::BIND),
            read_only: Some(false),
            ..Default::default()
        }];

        let mut labels = spec.labels.clone();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            mounts: Some(mounts),
            memory: if spec.memory_mb > 0 {
                Some(spec.memory_mb as i64 * 1024 * 1024)
            } else {
                None
            },
            network_mode: Some(self.network.clone()),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            labels: Some(labels),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            tty: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let options = Some(CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        });

        let response = self
            .client
            .create_container(options, config)
            .await
            .map_err(map_docker_err)?;

        info!("Created container {} ({})", spec.name, response.id);
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> EngineResult<()> {
        self.client
            .start_container::<String>(id, None)
            .await
            .map_err(map_docker_err)
    }

    async fn stop(&self, id: &str, timeout: Duration) -> EngineResult<bool> {
        let options = StopContainerOptions {
            t: timeout.as_secs() as i64,
        };

        match self.client.stop_container(id, Some(options)).await {
            Ok(()) => Ok(true),
            // 304 (not modified) means already stopped
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(map_docker_err(e)),
        }
    }

    async fn remove(&self, id: &str) -> EngineResult<()> {
        let options = Some(RemoveContainerOptions {
            force: true,
            ..Default::default()
        });

        self.client
            .remove_container(id, options)
            .await
            .map_err(map_docker_err)
    }

    async fn status(&self, id: &str) -> EngineResult<EngineStatus> {
        let inspect = match self.client.inspect_container(id, None).await {
            Ok(inspect) => inspect,
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(EngineStatus::NotFound),
            Err(e) => return Err(map_docker_err(e)),
        };

        let state = match inspect.state {
            Some(state) => state,
            None => return Ok(EngineStatus::Error),
        };

        // A failing health probe overrides the running state
        if let Some(health) = &state.health {
            if health.status == Some(HealthStatusEnum::UNHEALTHY) {
                return Ok(EngineStatus::Unhealthy);
            }
        }

        let status = match state.status {
            Some(ContainerStateStatusEnum::RUNNING) => EngineStatus::Running,
            Some(ContainerStateStatusEnum::CREATED)
            | Some(ContainerStateStatusEnum::EXITED)
            | Some(ContainerStateStatusEnum::PAUSED) => EngineStatus::Stopped,
            Some(ContainerStateStatusEnum::RESTARTING) => EngineStatus::Starting,
            Some(ContainerStateStatusEnum::REMOVING) => EngineStatus::Stopping,
            Some(ContainerStateStatusEnum::DEAD) => EngineStatus::Error,
            _ => EngineStatus::Error,
        };
        Ok(status)
    }

    async fn exec(&self, id: &str, argv: &[String]) -> EngineResult<ExecOutput> {
        let exec = self
            .client
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(argv.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(map_docker_err)?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        match self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(map_docker_err)?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk.map_err(map_docker_err)? {
                        bollard::container::LogOutput::StdOut { message } => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        bollard::container::LogOutput::StdErr { message } => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        _ => {}
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(map_docker_err)?;

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code: inspect.exit_code.unwrap_or(-1),
        })
    }

    async fn logs(&self, id: &str) -> EngineResult<LogTail> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            tail: "0".to_string(),
            ..Default::default()
        };

        let stream = self
            .client
            .logs(id, Some(options))
            .map(|item| match item {
                Ok(log) => Ok(log.into_bytes()),
                Err(e) => Err(map_docker_err(e)),
            });

        Ok(Box::pin(stream))
    }

    async fn list_managed(&self) -> EngineResult<Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}=true", MANAGED_LABEL)],
        );

        let options = Some(ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        });

        let containers = self
            .client
            .list_containers(options)
            .await
            .map_err(map_docker_err)?;

        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }

    async fn ensure_network(&self) -> EngineResult<()> {
        match self.client.inspect_network::<String>(&self.network, None).await {
            Ok(_) => return Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(map_docker_err(e)),
        }

        info!("Creating docker network {}", self.network);
        self.client
            .create_network(CreateNetworkOptions {
                name: self.network.clone(),
                driver: "bridge".to_string(),
                ..Default::default()
            })
            .await
            .map_err(map_docker_err)?;

        Ok(())
    }
}
