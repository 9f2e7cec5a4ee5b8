use std::{collections::HashMap, pin::pin, time::Duration};

use async_trait::async_trait;
use bollard::{
    API_DEFAULT_VERSION, Docker,
    container::{
        Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
        RemoveContainerOptions, StartContainerOptions, StopContainerOptions, WaitContainerOptions,
    },
    errors::Error as DockerError,
    image::CreateImageOptions,
    models::HostConfig,
};
use futures::StreamExt;
use tracing::{debug, trace};

use super::runtime::{ContainerLogs, ContainerRuntime, ContainerSpec, RuntimeError, WaitOutcome};
use crate::{ExecError, util::push_capped};

const CONNECT_TIMEOUT_SECS: u64 = 120;

/// [`ContainerRuntime`] backed by the local Docker Engine API.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    max_output_bytes: usize,
}

impl DockerRuntime {
    /// Connects to `endpoint`, or to the environment defaults (`DOCKER_HOST`,
    /// then the local socket) when none is given. Does not touch the network.
    pub fn connect(endpoint: Option<&str>, max_output_bytes: usize) -> Result<Self, ExecError> {
        let docker = match endpoint.map(str::trim).filter(|e| !e.is_empty()) {
            None => Docker::connect_with_local_defaults(),
            Some(ep) if ep.starts_with("unix://") || ep.starts_with('/') => {
                Docker::connect_with_socket(ep, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Some(ep) => Docker::connect_with_http(ep, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION),
        }
        .map_err(|e| ExecError::RuntimeUnavailable(e.to_string()))?;
        Ok(Self {
            docker,
            max_output_bytes,
        })
    }

    /// Round-trips to the engine.
    pub async fn ping(&self) -> Result<(), ExecError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| ExecError::RuntimeUnavailable(e.to_string()))
    }
}

fn engine(e: DockerError) -> RuntimeError {
    RuntimeError::Engine(e.to_string())
}

fn status_code(e: &DockerError) -> Option<u16> {
    match e {
        DockerError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

/// Splits `image` into repository and tag. References without a tag pull
/// `latest`; an empty tag would make the engine pull every tag.
pub(crate) fn split_image_reference(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => {
            let colon = name_start + i;
            (&image[..colon], &image[colon + 1..])
        }
        None => (image, "latest"),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let (repo, tag) = split_image_reference(image);
        let options = CreateImageOptions {
            from_image: repo,
            tag,
            ..Default::default()
        };
        let mut progress = pin!(self.docker.create_image(Some(options), None, None));
        while let Some(item) = progress.next().await {
            let info = item.map_err(engine)?;
            if let Some(status) = info.status {
                trace!(target: "dante.exec.container", %image, %status, "pull");
            }
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let host_config = HostConfig {
            binds: Some(vec![spec.bind()]),
            auto_remove: Some(false),
            device_requests: spec
                .gpu
                .as_ref()
                .map(|g| vec![g.device_request(&spec.gpu_driver)]),
            ..Default::default()
        };
        let labels: HashMap<String, String> = spec.labels.iter().cloned().collect();
        let config = Config::<String> {
            image: Some(spec.image.clone()),
            cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
            env: Some(spec.env.clone()),
            working_dir: Some(ContainerSpec::WORKDIR.to_string()),
            tty: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };
        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(engine)?;
        for warning in &created.warnings {
            debug!(target: "dante.exec.container", id = %created.id, %warning, "create warning");
        }
        Ok(created.id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(engine)
    }

    async fn wait(&self, id: &str) -> Result<WaitOutcome, RuntimeError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = pin!(self.docker.wait_container(id, Some(options)));
        match stream.next().await {
            Some(Ok(resp)) => Ok(WaitOutcome {
                exit_code: Some(resp.status_code),
                error: resp
                    .error
                    .and_then(|e| e.message)
                    .filter(|m| !m.is_empty()),
            }),
            // The engine client reports any non-zero exit through this variant.
            Some(Err(DockerError::DockerContainerWaitError { error, code })) => Ok(WaitOutcome {
                exit_code: Some(code),
                error: (!error.is_empty()).then_some(error),
            }),
            Some(Err(e)) if status_code(&e) == Some(404) => Err(RuntimeError::NotFound(id.to_string())),
            Some(Err(e)) => Err(engine(e)),
            None => Ok(WaitOutcome::default()),
        }
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<(), RuntimeError> {
        let options = StopContainerOptions {
            t: i64::try_from(grace.as_secs()).unwrap_or(i64::MAX),
        };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // 304: already stopped.
            Err(e) if status_code(&e) == Some(304) => Ok(()),
            Err(e) if status_code(&e) == Some(404) => Err(RuntimeError::NotFound(id.to_string())),
            Err(e) => Err(engine(e)),
        }
    }

    async fn logs(&self, id: &str) -> Result<ContainerLogs, RuntimeError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        };
        let cap = self.max_output_bytes;
        let (mut out, mut err) = (Vec::new(), Vec::new());
        let mut stream = pin!(self.docker.logs(id, Some(options)));
        while let Some(item) = stream.next().await {
            match item.map_err(engine)? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    push_capped(&mut out, &message, cap)
                }
                LogOutput::StdErr { message } => push_capped(&mut err, &message, cap),
                LogOutput::StdIn { .. } => {}
            }
        }
        Ok(ContainerLogs {
            stdout: String::from_utf8_lossy(&out).into_owned(),
            stderr: String::from_utf8_lossy(&err).into_owned(),
        })
    }

    async fn exit_code(&self, id: &str) -> Result<Option<i64>, RuntimeError> {
        let info = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(engine)?;
        Ok(info.state.and_then(|s| s.exit_code))
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if status_code(&e) == Some(404) => Ok(()),
            Err(e) => Err(engine(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_images_pull_latest() {
        assert_eq!(split_image_reference("alpine"), ("alpine", "latest"));
        assert_eq!(
            split_image_reference("nvcr.io/nvidia/pytorch"),
            ("nvcr.io/nvidia/pytorch", "latest")
        );
    }

    #[test]
    fn tags_are_split_after_last_path_segment() {
        assert_eq!(split_image_reference("alpine:3.20"), ("alpine", "3.20"));
        assert_eq!(
            split_image_reference("localhost:5000/team/img:v1"),
            ("localhost:5000/team/img", "v1")
        );
        assert_eq!(
            split_image_reference("localhost:5000/team/img"),
            ("localhost:5000/team/img", "latest")
        );
    }

    #[test]
    fn digests_are_passed_through() {
        let img = "alpine@sha256:0123abcd";
        assert_eq!(split_image_reference(img), (img, ""));
    }
}
