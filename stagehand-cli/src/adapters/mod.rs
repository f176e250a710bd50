//! Start actions for the different resource backends

mod process;

#[cfg(feature = "docker")]
mod docker;

pub use process::ProcessStarter;

#[cfg(feature = "docker")]
pub use docker::ContainerStarter;

#[cfg(not(feature = "docker"))]
pub use unavailable::ContainersUnavailable;

#[cfg(not(feature = "docker"))]
mod unavailable {
    use async_trait::async_trait;

    use stagehand_core::adapter::{StartAction, StartError};
    use stagehand_core::graph::Resource;
    use stagehand_core::model::Environment;

    /// Stands in for the container backend in builds without `docker`
    pub struct ContainersUnavailable;

    #[async_trait]
    impl StartAction for ContainersUnavailable {
        fn name(&self) -> &'static str {
            "containers-unavailable"
        }

        async fn start(&self, resource: &Resource, _env: &Environment) -> Result<(), StartError> {
            Err(StartError::LaunchFailed {
                id: resource.id.clone(),
                message: "stagehand was built without the docker feature; \
                          remove `image:` to use an already running service"
                    .into(),
            })
        }
    }

}
