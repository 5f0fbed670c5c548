//! Bind modes, bundled resources, filesystem binds and file copies.
//!
//! Directives are validated when they are built, so applying one to a
//! `Container<Unstarted>` cannot fail.

use super::record::{Container, Running, Unstarted};
use super::{ContainerError, Result};
use crate::config::TestbedConfig;
use crate::engine::{BindMount, FileCopy};
use crate::env;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Default permission bits for copied files.
pub const DEFAULT_COPY_MODE: u32 = 0o644;

/// Access mode of a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BindMode {
    #[serde(alias = "ro", alias = "read_only")]
    ReadOnly,
    #[serde(alias = "rw", alias = "read_write")]
    ReadWrite,
}

impl BindMode {
    /// Engine-native permission suffix.
    pub fn as_engine_str(&self) -> &'static str {
        match self {
            BindMode::ReadOnly => "ro",
            BindMode::ReadWrite => "rw",
        }
    }
}

impl FromStr for BindMode {
    type Err = ContainerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "read-only" | "read_only" | "ro" => Ok(BindMode::ReadOnly),
            "read-write" | "read_write" | "rw" => Ok(BindMode::ReadWrite),
            other => Err(ContainerError::ConfigError(format!(
                "Unknown bind mode '{}' (expected read-only or read-write)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for BindMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindMode::ReadOnly => write!(f, "read-only"),
            BindMode::ReadWrite => write!(f, "read-write"),
        }
    }
}

/// Ordered roots searched for bundled test resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resources {
    roots: Vec<PathBuf>,
}

impl Default for Resources {
    fn default() -> Self {
        Self::new(vec![PathBuf::from(env::DEFAULT_RESOURCE_DIR)])
    }
}

impl Resources {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn from_config(config: &TestbedConfig) -> Self {
        Self::new(config.resource_dirs.clone())
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Locate a resource by logical path; the first root containing it wins.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::NotFound`] if no root contains the file.
    pub fn resolve(&self, logical: &str) -> Result<PathBuf> {
        let relative = logical.trim_start_matches('/');
        if relative.is_empty() {
            return Err(ContainerError::ConfigError(
                "Resource path must not be empty".to_string(),
            ));
        }

        self.roots
            .iter()
            .map(|root| root.join(relative))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| {
                ContainerError::NotFound(format!(
                    "Resource {} not found under {:?}",
                    logical, self.roots
                ))
            })
    }

    pub fn read(&self, logical: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.resolve(logical)?)?)
    }
}

fn require_absolute(container_path: &str) -> Result<()> {
    if container_path.starts_with('/') {
        Ok(())
    } else {
        Err(ContainerError::ConfigError(format!(
            "Container path '{}' must be absolute",
            container_path
        )))
    }
}

/// A bundled resource mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMapping {
    pub logical_path: String,
    pub host_path: PathBuf,
    pub container_path: String,
    pub mode: BindMode,
}

impl ResourceMapping {
    pub fn new<L, C>(resources: &Resources, logical_path: L, container_path: C, mode: BindMode) -> Result<Self>
    where
        L: Into<String>,
        C: Into<String>,
    {
        let logical_path = logical_path.into();
        let container_path = container_path.into();
        require_absolute(&container_path)?;
        let host_path = std::path::absolute(resources.resolve(&logical_path)?)?;

        Ok(Self {
            logical_path,
            host_path,
            container_path,
            mode,
        })
    }

    fn bind(&self) -> BindMount {
        BindMount {
            host_path: self.host_path.clone(),
            container_path: self.container_path.clone(),
            mode: self.mode,
        }
    }
}

/// A host path mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemBind {
    pub host_path: PathBuf,
    pub container_path: String,
    pub mode: BindMode,
}

impl FileSystemBind {
    /// Relative host paths are resolved against the current directory.
    pub fn new<P, C>(host_path: P, container_path: C, mode: BindMode) -> Result<Self>
    where
        P: AsRef<Path>,
        C: Into<String>,
    {
        let container_path = container_path.into();
        require_absolute(&container_path)?;

        Ok(Self {
            host_path: std::path::absolute(host_path)?,
            container_path,
            mode,
        })
    }

    fn bind(&self) -> BindMount {
        BindMount {
            host_path: self.host_path.clone(),
            container_path: self.container_path.clone(),
            mode: self.mode,
        }
    }
}

/// Where a copied file comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopySource {
    /// Bundled resource, by logical path
    Resource(String),
    /// File on the host
    HostPath(PathBuf),
}

impl CopySource {
    /// Parse a `(kind, value)` pair such as `("resource", "init.sql")`.
    ///
    /// # Errors
    ///
    /// Unknown kinds are a configuration error.
    pub fn parse(kind: &str, value: &str) -> Result<Self> {
        match kind {
            "resource" | "classpath" => Ok(CopySource::Resource(value.to_string())),
            "host-path" | "host_path" | "file" => Ok(CopySource::HostPath(PathBuf::from(value))),
            other => Err(ContainerError::ConfigError(format!(
                "Unknown copy source kind '{}' (expected resource or host-path)",
                other
            ))),
        }
    }
}

/// A single file copied into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyToContainer {
    pub source: CopySource,
    pub container_path: String,
    pub mode: u32,
    contents: Vec<u8>,
}

impl CopyToContainer {
    /// Read the source now; the copy itself happens at start, or immediately
    /// for a running container.
    pub fn new<C: Into<String>>(resources: &Resources, source: CopySource, container_path: C) -> Result<Self> {
        let container_path = container_path.into();
        require_absolute(&container_path)?;

        let contents = match &source {
            CopySource::Resource(logical) => resources.read(logical)?,
            CopySource::HostPath(path) => std::fs::read(path).map_err(|e| {
                ContainerError::NotFound(format!("Cannot read {}: {}", path.display(), e))
            })?,
        };

        Ok(Self {
            source,
            container_path,
            mode: DEFAULT_COPY_MODE,
            contents,
        })
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    fn file(&self) -> FileCopy {
        FileCopy {
            contents: self.contents.clone(),
            container_path: self.container_path.clone(),
            mode: self.mode,
        }
    }
}

/// A mount or copy applied to a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    ResourceMapping(ResourceMapping),
    FileSystemBind(FileSystemBind),
    CopyToContainer(CopyToContainer),
}

impl Container<Unstarted> {
    /// Mount a bundled resource.
    pub fn with_resource_mapping(mut self, mapping: ResourceMapping) -> Self {
        debug!(
            "Mapping resource {} to {} ({})",
            mapping.logical_path, mapping.container_path, mapping.mode
        );
        self.handle.add_bind(mapping.bind());
        self.directives.push(Directive::ResourceMapping(mapping));
        self
    }

    /// Mount a host path.
    pub fn with_file_system_bind(mut self, bind: FileSystemBind) -> Self {
        debug!(
            "Binding {} to {} ({})",
            bind.host_path.display(),
            bind.container_path,
            bind.mode
        );
        self.handle.add_bind(bind.bind());
        self.directives.push(Directive::FileSystemBind(bind));
        self
    }

    /// Copy a file in once the container is created, before it starts.
    pub fn with_copy_to_container(mut self, copy: CopyToContainer) -> Self {
        debug!("Queueing copy of {:?} to {}", copy.source, copy.container_path);
        self.handle.queue_copy(copy.file());
        self.directives.push(Directive::CopyToContainer(copy));
        self
    }
}

impl Container<Running> {
    /// Copy a file into the running container right away.
    pub async fn copy_to_container(&self, copy: &CopyToContainer) -> Result<()> {
        debug!("Copying {:?} to {}", copy.source, copy.container_path);
        self.handle.copy_now(&copy.file()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn resources_with(file: &str, contents: &str) -> (TempDir, Resources) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        let resources = Resources::new(vec![dir.path().to_path_buf()]);
        (dir, resources)
    }

    #[test]
    fn test_bind_mode_parsing() {
        assert_eq!("read-only".parse::<BindMode>().unwrap(), BindMode::ReadOnly);
        assert_eq!("RO".parse::<BindMode>().unwrap(), BindMode::ReadOnly);
        assert_eq!("read_write".parse::<BindMode>().unwrap(), BindMode::ReadWrite);
        assert_eq!("rw".parse::<BindMode>().unwrap(), BindMode::ReadWrite);
        assert!(matches!(
            "append".parse::<BindMode>(),
            Err(ContainerError::ConfigError(_))
        ));
    }

    #[test]
    fn test_bind_mode_engine_suffix() {
        assert_eq!(BindMode::ReadOnly.as_engine_str(), "ro");
        assert_eq!(BindMode::ReadWrite.as_engine_str(), "rw");
    }

    #[test]
    fn test_resources_search_roots_in_order() {
        let (_first, first) = resources_with("sql/init.sql", "first");
        let (_second, second) = resources_with("sql/init.sql", "second");
        let resources = Resources::new([first.roots(), second.roots()].concat());

        assert_eq!(resources.read("/sql/init.sql").unwrap(), b"first");
        assert!(matches!(
            resources.resolve("sql/missing.sql"),
            Err(ContainerError::NotFound(_))
        ));
    }

    #[test]
    fn test_copy_source_parse() {
        assert_eq!(
            CopySource::parse("resource", "init.sql").unwrap(),
            CopySource::Resource("init.sql".to_string())
        );
        assert_eq!(
            CopySource::parse("host-path", "/tmp/x").unwrap(),
            CopySource::HostPath(PathBuf::from("/tmp/x"))
        );
        assert!(matches!(
            CopySource::parse("url", "http://example.com/x"),
            Err(ContainerError::ConfigError(_))
        ));
    }

    #[test]
    fn test_copy_reads_contents_at_construction() {
        let (_dir, resources) = resources_with("test.sql", "hello");
        let copy = CopyToContainer::new(
            &resources,
            CopySource::Resource("test.sql".to_string()),
            "/opt/test.sql",
        )
        .unwrap()
        .with_mode(0o600);

        assert_eq!(copy.contents(), b"hello");
        assert_eq!(copy.file().mode, 0o600);
    }

    #[test]
    fn test_container_paths_must_be_absolute() {
        let (_dir, resources) = resources_with("test.sql", "hello");

        assert!(matches!(
            ResourceMapping::new(&resources, "test.sql", "opt/test.sql", BindMode::ReadOnly),
            Err(ContainerError::ConfigError(_))
        ));
        assert!(matches!(
            FileSystemBind::new("/tmp", "data", BindMode::ReadWrite),
            Err(ContainerError::ConfigError(_))
        ));
    }

    #[test]
    fn test_resource_mapping_uses_absolute_host_path() {
        let (_dir, resources) = resources_with("test.sql", "hello");
        let mapping =
            ResourceMapping::new(&resources, "test.sql", "/opt/test.sql", BindMode::ReadOnly).unwrap();

        assert!(mapping.host_path.is_absolute());
        assert_eq!(mapping.bind().to_bind_string(), format!("{}:/opt/test.sql:ro", mapping.host_path.display()));
    }
}
