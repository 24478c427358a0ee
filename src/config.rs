use std::fmt;
use std::path::{Path, PathBuf};

use airgraph_client::ConnectionConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Clone, Deserialize, Serialize)]
pub struct LoaderConfig {
    /// `tcp://host:port` of the query service.
    pub endpoint_uri: String,
    pub graph_namespace: String,
    /// Collection path, e.g. `/dbs/<database>/colls/<graph>`.
    pub principal: String,
    pub secret: String,
    pub vertices_path: PathBuf,
    pub edges_path: PathBuf,
    /// Whether the CSV inputs start with a header row.
    pub has_header: bool,
    /// Log format: "compact" or "json".
    pub log_format: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            endpoint_uri: "tcp://localhost:8182".to_string(),
            graph_namespace: "g".to_string(),
            principal: String::new(),
            secret: String::new(),
            vertices_path: PathBuf::from("air-routes-latest-nodes.csv"),
            edges_path: PathBuf::from("air-routes-latest-edges.csv"),
            has_header: true,
            log_format: "compact".to_string(),
        }
    }
}

impl LoaderConfig {
    pub fn load(config_file: Option<&Path>) -> anyhow::Result<Self> {
        Self::load_with(config_file, None)
    }

    /// Layer defaults, an optional file and `AIRGRAPH_*` variables.
    ///
    /// `env` replaces the process environment when given.
    pub fn load_with(
        config_file: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> anyhow::Result<Self> {
        let defaults_json = serde_json::to_string(&Self::default())
            .with_context(|| "failed to serialize defaults")?;
        let mut builder = config::Config::builder().add_source(
            config::File::from_str(&defaults_json, config::FileFormat::Json).required(false),
        );
        if let Some(path) = config_file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("AIRGRAPH").source(env))
            .build()
            .with_context(|| "failed to load configuration")?;
        let cfg: LoaderConfig = settings
            .try_deserialize()
            .with_context(|| "failed to deserialize configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::new(&self.endpoint_uri, &self.principal, &self.secret)
            .with_graph_namespace(&self.graph_namespace)
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.to_connection_config()
            .validate()
            .with_context(|| "invalid connection settings")?;
        if !matches!(self.log_format.as_str(), "compact" | "json") {
            anyhow::bail!(
                "unsupported log_format '{}' (expected compact or json)",
                self.log_format
            );
        }
        Ok(())
    }
}

impl fmt::Debug for LoaderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderConfig")
            .field("endpoint_uri", &self.endpoint_uri)
            .field("graph_namespace", &self.graph_namespace)
            .field("principal", &self.principal)
            .field("secret", &"<redacted>")
            .field("vertices_path", &self.vertices_path)
            .field("edges_path", &self.edges_path)
            .field("has_header", &self.has_header)
            .field("log_format", &self.log_format)
            .finish()
    }
}
