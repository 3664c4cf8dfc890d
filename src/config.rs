use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use color_eyre::eyre::Result;
use dirs::home_dir;
use serde::Deserialize;
use shellexpand::tilde_with_context;

use crate::driver::{CreateParams, DEFAULT_BRIDGE_INTERFACE, DEFAULT_DOCKER, DEFAULT_IP};

pub const DEFAULT_STOP_TIMEOUT: u32 = 1;

/// Home directory inside containers, used to expand `~` in mount targets.
pub const CONTAINER_HOME: &str = "/root";

pub const PROJECT_CONFIG: &str = ".dockdriver/config.yml";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub privileged: Option<bool>,
    #[serde(default)]
    pub cmd: Option<Vec<String>>,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default)]
    pub links: BTreeMap<String, String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Where the external tools live and how they are driven.
#[derive(Debug, Default, Deserialize)]
pub struct DockerConfig {
    #[serde(default)]
    pub binary: Option<String>,
    #[serde(default)]
    pub ip_binary: Option<String>,
    #[serde(default)]
    pub bridge_interface: Option<String>,
    #[serde(default)]
    pub stop_timeout: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct Mount {
    pub source: String,
    pub target: Option<String>,
    #[serde(default = "default_readonly")]
    pub readonly: bool,
}

fn default_readonly() -> bool {
    true
}

impl Mount {
    /// `SOURCE:TARGET[:ro]` for `docker run -v`.
    ///
    /// `~` is the host home in the source and the container home in the
    /// target. A relative source is taken from `config_dir`.
    pub fn to_docker_volume(&self, config_dir: &Path) -> String {
        let source = self.host_path(config_dir);
        let target = tilde_with_context(
            self.target.as_deref().unwrap_or(&self.source),
            || Some(CONTAINER_HOME),
        );
        let mode = if self.readonly { ":ro" } else { "" };
        format!("{}:{target}{mode}", source.display())
    }

    fn host_path(&self, config_dir: &Path) -> PathBuf {
        let host_home = || home_dir().map(|p| p.to_string_lossy().into_owned());
        let expanded = tilde_with_context(&self.source, host_home);
        // Joining an absolute path replaces config_dir entirely.
        config_dir.join(&*expanded)
    }
}

impl Config {
    fn load_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config = serde_yaml_ng::from_str(&contents)?;
        Ok(config)
    }
}

/// Source of a configuration layer, ordered by precedence (lowest first).
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum ConfigSource {
    Default,
    /// `$XDG_CONFIG_HOME/dockdriver/config.yml`
    User,
    /// `.dockdriver/config.yml` in the project directory.
    Project,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::User => write!(f, "user"),
            ConfigSource::Project => write!(f, "project"),
        }
    }
}

#[derive(Debug)]
pub struct ConfigLayer {
    pub source: ConfigSource,
    pub data: Config,
    /// Directory used to resolve relative mount source paths in this layer.
    pub config_dir: PathBuf,
}

/// Layered configuration that keeps every layer and resolves values on read.
///
/// Scalars come from the highest layer that sets them. Ports and mounts
/// accumulate across layers; links and env are merged with higher layers
/// overriding shared keys.
#[derive(Debug, Default)]
pub struct StackedConfig {
    layers: Vec<ConfigLayer>,
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

impl StackedConfig {
    /// Load the user layer from `xdg_dirs` and, when `project_dir` is given,
    /// the project layer from `<project_dir>/.dockdriver/config.yml`.
    pub fn load(xdg_dirs: &xdg::BaseDirectories, project_dir: Option<&Path>) -> Result<Self> {
        let mut config = Self::with_defaults();

        if let Some(config_path) = xdg_dirs.find_config_file("config.yml") {
            let data = Config::load_file(&config_path)?;
            config.add_layer(ConfigSource::User, data, parent_dir(&config_path));
        }

        if let Some(project_dir) = project_dir {
            let project_config_path = project_dir.join(PROJECT_CONFIG);
            if project_config_path.exists() {
                let data = Config::load_file(&project_config_path)?;
                config.add_layer(ConfigSource::Project, data, parent_dir(&project_config_path));
            }
        }

        Ok(config)
    }

    pub fn with_defaults() -> Self {
        let mut config = Self::default();
        config.add_layer(ConfigSource::Default, Config::default(), PathBuf::from("/"));
        config
    }

    /// Add a layer at the position determined by its source precedence.
    pub fn add_layer(&mut self, source: ConfigSource, data: Config, config_dir: PathBuf) {
        let index = self.layers.partition_point(|layer| layer.source <= source);
        self.layers.insert(
            index,
            ConfigLayer {
                source,
                data,
                config_dir,
            },
        );
    }

    pub fn layers(&self) -> &[ConfigLayer] {
        &self.layers
    }

    fn last<'a, T: ?Sized>(&'a self, get: impl Fn(&'a Config) -> Option<&'a T>) -> Option<&'a T> {
        self.layers.iter().rev().find_map(|l| get(&l.data))
    }

    pub fn docker_binary(&self) -> &str {
        self.last(|c| c.docker.binary.as_deref())
            .unwrap_or(DEFAULT_DOCKER)
    }

    pub fn ip_binary(&self) -> &str {
        self.last(|c| c.docker.ip_binary.as_deref())
            .unwrap_or(DEFAULT_IP)
    }

    pub fn bridge_interface(&self) -> &str {
        self.last(|c| c.docker.bridge_interface.as_deref())
            .unwrap_or(DEFAULT_BRIDGE_INTERFACE)
    }

    pub fn stop_timeout(&self) -> u32 {
        self.last(|c| c.docker.stop_timeout.as_ref())
            .copied()
            .unwrap_or(DEFAULT_STOP_TIMEOUT)
    }

    pub fn image(&self) -> Option<&str> {
        self.last(|c| c.image.as_deref())
    }

    pub fn name(&self) -> Option<&str> {
        self.last(|c| c.name.as_deref())
    }

    pub fn hostname(&self) -> Option<&str> {
        self.last(|c| c.hostname.as_deref())
    }

    pub fn privileged(&self) -> bool {
        self.last(|c| c.privileged.as_ref())
            .copied()
            .unwrap_or(false)
    }

    /// The command list is replaced wholesale, never concatenated.
    pub fn cmd(&self) -> &[String] {
        self.last(|c| c.cmd.as_deref()).unwrap_or_default()
    }

    /// Ports from all layers, lowest precedence first.
    pub fn ports(&self) -> impl Iterator<Item = &String> {
        self.layers.iter().flat_map(|l| l.data.ports.iter())
    }

    /// Mounts from all layers, lowest precedence first, each paired with the
    /// config directory of its layer.
    pub fn mounts(&self) -> impl Iterator<Item = (&Mount, &Path)> {
        self.layers.iter().flat_map(|l| {
            l.data
                .mounts
                .iter()
                .map(move |m| (m, l.config_dir.as_path()))
        })
    }

    /// Links merged across layers; higher precedence overrides.
    pub fn links(&self) -> BTreeMap<String, String> {
        let mut links = BTreeMap::new();
        for layer in &self.layers {
            links.extend(layer.data.links.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        links
    }

    /// Env vars merged across layers; higher precedence overrides.
    pub fn env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        for layer in &self.layers {
            env.extend(layer.data.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        env
    }

    /// Parameters for a detached `docker run` seeded from the merged config.
    pub fn create_params(&self) -> CreateParams {
        CreateParams {
            image: self.image().unwrap_or_default().to_string(),
            cmd: self.cmd().to_vec(),
            ports: self.ports().cloned().collect(),
            volumes: self
                .mounts()
                .map(|(mount, dir)| mount.to_docker_volume(dir))
                .collect(),
            detach: true,
            links: self.links().into_iter().collect(),
            env: self.env(),
            name: self.name().map(str::to_string),
            hostname: self.hostname().map(str::to_string),
            privileged: self.privileged(),
        }
    }
}
