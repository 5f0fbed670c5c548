//! Fixture declarations loaded from TOML.
//!
//! ```toml
//! image = "postgres:16"
//! exposed_ports = [5432]
//!
//! [env]
//! POSTGRES_PASSWORD = "pw"
//!
//! [wait]
//! strategy = "log"
//! message = "ready to accept connections"
//! times = 2
//!
//! [log]
//! strategy = "string"
//!
//! [[copies]]
//! source = "resource"
//! from = "sql/init.sql"
//! container_path = "/docker-entrypoint-initdb.d/init.sql"
//!
//! [network]
//! enable_ipv6 = false
//! ```

use crate::container::{
    self, BindMode, Container, ContainerError, ContainerHandle, CopySource, CopyToContainer,
    Declared, FileSystemBind, Network, ResourceMapping, Resources, Result, Unstarted,
    create_network,
};
use crate::engine::{Engine, ImageSource, NetworkOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// A host path to bind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindDefinition {
    pub host_path: PathBuf,
    pub container_path: String,
    #[serde(default = "read_only")]
    pub mode: BindMode,
}

/// A bundled resource to mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub path: String,
    pub container_path: String,
    #[serde(default = "read_only")]
    pub mode: BindMode,
}

/// A file to copy in before start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyDefinition {
    /// Source kind: `resource` or `host-path`
    pub source: String,
    pub from: String,
    pub container_path: String,
    #[serde(default)]
    pub mode: Option<u32>,
}

fn read_only() -> BindMode {
    BindMode::ReadOnly
}

/// One container fixture as declared in a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureDefinition {
    pub image: ImageSource,
    #[serde(flatten)]
    pub declared: Declared,
    #[serde(default)]
    pub binds: Vec<BindDefinition>,
    #[serde(default)]
    pub resources: Vec<ResourceDefinition>,
    #[serde(default)]
    pub copies: Vec<CopyDefinition>,
    /// Create a private network for the fixture with these options
    #[serde(default)]
    pub network: Option<NetworkOptions>,
}

/// An unstarted fixture plus the network created for it, if any.
#[derive(Debug)]
pub struct PreparedFixture {
    pub container: Container<Unstarted>,
    pub network: Option<Network>,
}

impl FixtureDefinition {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ContainerError::ConfigError(format!("Invalid fixture: {}", e)))
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Validate every directive, then create the network (if declared) and
    /// configure an unstarted container.
    ///
    /// # Errors
    ///
    /// Directive errors are reported before anything is created in the engine.
    pub async fn prepare(&self, engine: Arc<dyn Engine>, resources: &Resources) -> Result<PreparedFixture> {
        let mappings = self
            .resources
            .iter()
            .map(|r| ResourceMapping::new(resources, r.path.clone(), r.container_path.clone(), r.mode))
            .collect::<Result<Vec<_>>>()?;
        let binds = self
            .binds
            .iter()
            .map(|b| FileSystemBind::new(&b.host_path, b.container_path.clone(), b.mode))
            .collect::<Result<Vec<_>>>()?;
        let copies = self
            .copies
            .iter()
            .map(|c| {
                let copy = CopyToContainer::new(
                    resources,
                    CopySource::parse(&c.source, &c.from)?,
                    c.container_path.clone(),
                )?;
                Ok(match c.mode {
                    Some(mode) => copy.with_mode(mode),
                    None => copy,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let network = match &self.network {
            Some(options) => Some(create_network(engine.clone(), options.clone()).await?),
            None => None,
        };

        let mut declared = self.declared.clone();
        if let Some(network) = &network {
            declared = declared.network(network);
        }

        let handle = ContainerHandle::new(engine, self.image.clone());
        let mut container = container::init(handle, declared)?;
        for mapping in mappings {
            container = container.with_resource_mapping(mapping);
        }
        for bind in binds {
            container = container.with_file_system_bind(bind);
        }
        for copy in copies {
            container = container.with_copy_to_container(copy);
        }

        info!("Prepared fixture for {}", self.image);
        Ok(PreparedFixture { container, network })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryEngine;
    use crate::strategy::{LogSpec, WaitSpec};
    use tempfile::TempDir;

    const FIXTURE: &str = r#"
        image = "postgres:16"
        exposed_ports = [5432]
        network_aliases = ["db"]

        [env]
        POSTGRES_PASSWORD = "pw"

        [wait]
        strategy = "log"
        message = "ready to accept connections"

        [log]
        strategy = "string"

        [[copies]]
        source = "resource"
        from = "init.sql"
        container_path = "/docker-entrypoint-initdb.d/init.sql"
        mode = 0o600

        [network]
    "#;

    #[test]
    fn test_parse_fixture() {
        let fixture = FixtureDefinition::from_toml_str(FIXTURE).unwrap();

        assert_eq!(fixture.image, ImageSource::image("postgres:16"));
        assert_eq!(
            fixture.declared,
            Declared::new()
                .exposed_ports([5432])
                .network_alias("db")
                .env("POSTGRES_PASSWORD", "pw")
                .wait(WaitSpec::log("ready to accept connections"))
                .log(LogSpec::string())
        );
        assert_eq!(fixture.copies[0].mode, Some(0o600));
        assert_eq!(fixture.network, Some(NetworkOptions::default()));
    }

    #[tokio::test]
    async fn test_prepare_creates_network_and_directives() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("init.sql"), "create table t (id int);").unwrap();
        let resources = Resources::new(vec![dir.path().to_path_buf()]);
        let engine = Arc::new(MemoryEngine::new());

        let fixture = FixtureDefinition::from_toml_str(FIXTURE).unwrap();
        let prepared = fixture.prepare(engine.clone(), &resources).await.unwrap();

        let network = prepared.network.expect("network declared");
        assert_eq!(prepared.container.declared().network.as_ref(), Some(&network));
        assert_eq!(prepared.container.mounts().len(), 1);
        assert_eq!(engine.network_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_copy_source_is_rejected_before_engine_calls() {
        let engine = Arc::new(MemoryEngine::new());
        let fixture = FixtureDefinition::from_toml_str(
            r#"
            image = "alpine:3"

            [[copies]]
            source = "ftp"
            from = "server/file"
            container_path = "/tmp/file"

            [network]
            "#,
        )
        .unwrap();

        let result = fixture.prepare(engine.clone(), &Resources::default()).await;
        assert!(matches!(result, Err(ContainerError::ConfigError(_))));
        assert_eq!(engine.network_count(), 0);
    }

    #[test]
    fn test_invalid_bind_mode_is_rejected() {
        let result = FixtureDefinition::from_toml_str(
            r#"
            image = "alpine:3"

            [[binds]]
            host_path = "/tmp"
            container_path = "/data"
            mode = "append-only"
            "#,
        );
        assert!(matches!(result, Err(ContainerError::ConfigError(_))));
    }

    #[test]
    fn test_build_source() {
        let fixture = FixtureDefinition::from_toml_str(
            r#"
            image = { context = "docker/echo", tag = "echo:test" }
            exposed_ports = [8080]
            "#,
        )
        .unwrap();

        assert!(matches!(fixture.image, ImageSource::Build { .. }));
        assert_eq!(fixture.declared.exposed_ports, vec![8080]);
    }
}
