//! Image availability: existence checks, registry pulls and local builds.

use crate::container::{ContainerError, Result};
use bollard::Docker;
use bollard::query_parameters::CreateImageOptions;
use futures::stream::StreamExt;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// Makes images available to the engine.
#[derive(Clone)]
pub(crate) struct ImageManager {
    docker: Docker,
}

impl ImageManager {
    pub(crate) fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Check if an image exists locally.
    pub(crate) async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(ContainerError::ApiError(e)),
        }
    }

    /// Pull an image from a registry.
    pub(crate) async fn pull_image(&self, image: &str) -> Result<()> {
        info!("Pulling image: {}", image);

        let options = CreateImageOptions {
            from_image: Some(image.to_string()),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            let info = result?;
            if let Some(status) = info.status {
                debug!("Pull: {}", status);
            }
            if let Some(error) = info.error {
                return Err(ContainerError::Other(format!("Pull of {} failed: {}", image, error)));
            }
        }

        info!("Successfully pulled image: {}", image);
        Ok(())
    }

    /// Build an image from a context directory using the Docker or Podman CLI.
    ///
    /// The CLI is used instead of the API to avoid streaming the build
    /// context as a tarball.
    pub(crate) async fn build_image(
        &self,
        context: &Path,
        dockerfile: Option<&Path>,
        tag: &str,
    ) -> Result<String> {
        if !context.is_dir() {
            return Err(ContainerError::ConfigError(format!(
                "Build context {} is not a directory",
                context.display()
            )));
        }

        let cli = build_cli()?;
        let dockerfile = context.join(dockerfile.unwrap_or_else(|| Path::new("Dockerfile")));
        info!("Building image {} from {} using {}", tag, context.display(), cli.display());

        let output = Command::new(&cli)
            .arg("build")
            .arg("-t")
            .arg(tag)
            .arg("-f")
            .arg(&dockerfile)
            .arg(context)
            .output()
            .await
            .map_err(|e| ContainerError::Other(format!("Failed to run {} build: {}", cli.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::Other(format!("Image build failed: {}", stderr)));
        }

        info!("Successfully built image: {}", tag);
        Ok(tag.to_string())
    }
}

/// Locate a CLI able to run `build`.
fn build_cli() -> Result<PathBuf> {
    which::which("docker")
        .or_else(|_| which::which("podman"))
        .map_err(|_| {
            ContainerError::ConfigError(
                "Building images requires the docker or podman CLI on PATH".to_string(),
            )
        })
}
