#![cfg(feature = "docker")]

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use futures_util::StreamExt;
use tokio::sync::OnceCell;

use stagehand_core::adapter::{StartAction, StartError};
use stagehand_core::graph::Resource;
use stagehand_core::model::{Environment, LaunchSpec};

/// Runs container resources through the local Docker daemon.
///
/// Persistent resources keep their container (and volume) across runs: an
/// existing `stagehand-<id>` container is started or reused instead of
/// recreated. Ephemeral containers are recreated on start and removed on stop.
#[derive(Default)]
pub struct ContainerStarter {
    client: OnceCell<Docker>,
}

impl ContainerStarter {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self, resource: &Resource) -> Result<&Docker, StartError> {
        let failed = |message: String| StartError::LaunchFailed {
            id: resource.id.clone(),
            message,
        };
        self.client
            .get_or_try_init(|| async {
                let client = Docker::connect_with_local_defaults()
                    .map_err(|e| failed(format!("failed to connect to Docker: {}", e)))?;
                client
                    .ping()
                    .await
                    .map_err(|e| failed(format!("Docker ping failed: {}", e)))?;
                Ok::<_, StartError>(client)
            })
            .await
    }

    async fn pull(&self, client: &Docker, resource: &Resource, image: &str) -> Result<(), StartError> {
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = client.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| StartError::LaunchFailed {
                id: resource.id.clone(),
                message: format!("failed to pull {}: {}", image, e),
            })?;
        }
        Ok(())
    }
}

fn container_name(resource: &Resource) -> String {
    format!("stagehand-{}", resource.id)
}

#[async_trait]
impl StartAction for ContainerStarter {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn start(&self, resource: &Resource, env: &Environment) -> Result<(), StartError> {
        let Some(LaunchSpec::Container {
            image,
            args,
            volume,
        }) = &resource.launch
        else {
            return Err(StartError::NothingToLaunch {
                id: resource.id.clone(),
            });
        };
        let failed = |message: String| StartError::LaunchFailed {
            id: resource.id.clone(),
            message,
        };
        let client = self.client(resource).await?;
        let name = container_name(resource);

        if let Ok(existing) = client
            .inspect_container(&name, None::<InspectContainerOptions>)
            .await
        {
            let running = existing.state.and_then(|s| s.running).unwrap_or(false);
            if resource.is_persistent() {
                if running {
                    tracing::info!(resource = %resource.id, container = %name, "reusing running container");
                } else {
                    tracing::info!(resource = %resource.id, container = %name, "starting existing container");
                    client
                        .start_container(&name, None::<StartContainerOptions<String>>)
                        .await
                        .map_err(|e| failed(format!("failed to start container: {}", e)))?;
                }
                return Ok(());
            }
            tracing::debug!(resource = %resource.id, container = %name, "removing stale container");
            let remove = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            client
                .remove_container(&name, Some(remove))
                .await
                .map_err(|e| failed(format!("failed to remove stale container: {}", e)))?;
        }

        self.pull(client, resource, image).await?;

        let env: Vec<String> = env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v.expose()))
            .collect();

        let port = resource.endpoint.as_ref().and_then(|e| e.port);
        let exposed_ports = port.map(|p| {
            HashMap::from([(format!("{}/tcp", p), HashMap::<(), ()>::new())])
        });
        let port_bindings = port.map(|p| {
            HashMap::from([(
                format!("{}/tcp", p),
                Some(vec![PortBinding {
                    host_ip: Some("127.0.0.1".into()),
                    host_port: Some(p.to_string()),
                }]),
            )])
        });
        let binds = volume.as_ref().map(|v| {
            let mode = if v.read_only { "ro" } else { "rw" };
            vec![format!("{}:{}:{}", v.name, v.target, mode)]
        });

        let config = Config {
            image: Some(image.clone()),
            cmd: (!args.is_empty()).then(|| args.clone()),
            env: Some(env),
            exposed_ports,
            host_config: Some(HostConfig {
                binds,
                port_bindings,
                ..Default::default()
            }),
            ..Default::default()
        };
        let create = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };

        let response = client
            .create_container(Some(create), config)
            .await
            .map_err(|e| failed(format!("failed to create container: {}", e)))?;
        client
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| failed(format!("failed to start container: {}", e)))?;

        tracing::info!(resource = %resource.id, container = %name, image = %image, "container started");
        Ok(())
    }

    async fn stop(&self, resource: &Resource) -> Result<(), StartError> {
        let Some(client) = self.client.get() else {
            return Ok(());
        };
        let name = container_name(resource);
        let failed = |message: String| StartError::StopFailed {
            id: resource.id.clone(),
            message,
        };

        client
            .stop_container(&name, Some(StopContainerOptions { t: 10 }))
            .await
            .map_err(|e| failed(format!("failed to stop container: {}", e)))?;

        if !resource.is_persistent() {
            let remove = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            // The container may already be gone.
            client.remove_container(&name, Some(remove)).await.ok();
        }
        Ok(())
    }
}
