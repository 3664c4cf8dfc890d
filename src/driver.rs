use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::backend::{Backend, Subprocess};
use crate::config::StackedConfig;
use crate::error::{DriverError, Result};

pub const DEFAULT_DOCKER: &str = "docker";
pub const DEFAULT_IP: &str = "/sbin/ip";
pub const DEFAULT_BRIDGE_INTERFACE: &str = "docker0";

static BRIDGE_INET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s+inet ([0-9.]+)/[0-9]+\s+").expect("bridge inet pattern is valid")
});

/// Everything `docker run` needs to create a container.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CreateParams {
    pub image: String,
    pub cmd: Vec<String>,
    pub ports: Vec<String>,
    pub volumes: Vec<String>,
    pub detach: bool,
    /// `(container, alias)` pairs.
    pub links: Vec<(String, String)>,
    pub env: BTreeMap<String, String>,
    pub name: Option<String>,
    pub hostname: Option<String>,
    pub privileged: bool,
}

impl CreateParams {
    /// Arguments for `docker`, starting with `run`.
    ///
    /// Values are passed through verbatim; docker does the validation.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["run".to_string()];

        if self.detach {
            args.push("-d".to_string());
        }
        if let Some(name) = &self.name {
            args.extend(["--name".to_string(), name.clone()]);
        }
        for port in &self.ports {
            args.extend(["-p".to_string(), port.clone()]);
        }
        for volume in &self.volumes {
            args.extend(["-v".to_string(), volume.clone()]);
        }
        for (container, alias) in &self.links {
            args.extend(["--link".to_string(), format!("{container}:{alias}")]);
        }
        for (key, value) in &self.env {
            args.extend(["-e".to_string(), format!("{key}={value}")]);
        }
        if self.privileged {
            args.push("--privileged".to_string());
        }
        if let Some(hostname) = &self.hostname {
            args.extend(["-h".to_string(), hostname.clone()]);
        }

        args.push(self.image.clone());
        args.extend(self.cmd.iter().cloned());
        args
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContainerState {
    Running,
    Stopped,
    NotCreated,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Running => write!(f, "running"),
            ContainerState::Stopped => write!(f, "stopped"),
            ContainerState::NotCreated => write!(f, "not_created"),
        }
    }
}

/// Container lifecycle operations on top of the `docker` CLI.
///
/// Every operation is one (or, for the guarded mutations, two) blocking
/// process invocations against the daemon's current state. Nothing is cached.
pub struct Driver<B = Subprocess> {
    backend: B,
    docker: String,
    ip: String,
    bridge_interface: String,
}

impl Driver<Subprocess> {
    pub fn new() -> Self {
        Self::with_backend(Subprocess)
    }

    pub fn from_config(config: &StackedConfig) -> Self {
        Self::new().configure(config)
    }
}

impl Default for Driver<Subprocess> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Driver<B> {
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            docker: DEFAULT_DOCKER.to_string(),
            ip: DEFAULT_IP.to_string(),
            bridge_interface: DEFAULT_BRIDGE_INTERFACE.to_string(),
        }
    }

    /// Take tool locations and the bridge interface from `config`.
    pub fn configure(self, config: &StackedConfig) -> Self {
        self.docker_binary(config.docker_binary())
            .ip_binary(config.ip_binary())
            .bridge_interface(config.bridge_interface())
    }

    pub fn docker_binary(mut self, docker: impl Into<String>) -> Self {
        self.docker = docker.into();
        self
    }

    pub fn ip_binary(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    pub fn bridge_interface(mut self, interface: impl Into<String>) -> Self {
        self.bridge_interface = interface.into();
        self
    }

    fn docker<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        self.backend.execute(&self.docker, &args)
    }

    /// Run a new container and return its id.
    pub fn create(&self, params: &CreateParams) -> Result<String> {
        let id = self.docker(params.to_args())?.trim().to_string();
        info!(%id, image = %params.image, "Created container");
        Ok(id)
    }

    /// Whether `id` exists, running or stopped.
    pub fn is_created(&self, id: &str) -> Result<bool> {
        let output = self.docker(["ps", "-a", "-q"])?;
        Ok(has_line(&output, id))
    }

    pub fn is_running(&self, id: &str) -> Result<bool> {
        let output = self.docker(["ps", "-q"])?;
        Ok(has_line(&output, id))
    }

    pub fn is_privileged(&self, id: &str) -> Result<bool> {
        let info = self.inspect_container(id)?;
        let host_config = info
            .get("HostConfig")
            .and_then(Value::as_object)
            .ok_or_else(|| DriverError::MissingField {
                id: id.to_string(),
                field: "HostConfig".to_string(),
            })?;
        Ok(host_config
            .get("Privileged")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    pub fn state(&self, id: &str) -> Result<ContainerState> {
        if self.is_running(id)? {
            Ok(ContainerState::Running)
        } else if self.is_created(id)? {
            Ok(ContainerState::Stopped)
        } else {
            Ok(ContainerState::NotCreated)
        }
    }

    pub fn start(&self, id: &str) -> Result<()> {
        if self.is_running(id)? {
            debug!(id, "Already running, not starting");
            return Ok(());
        }
        self.docker(["start", id])?;
        info!(id, "Started container");
        Ok(())
    }

    /// Stop `id`, giving it `timeout` seconds before docker kills it.
    pub fn stop(&self, id: &str, timeout: u32) -> Result<()> {
        if !self.is_running(id)? {
            debug!(id, "Not running, not stopping");
            return Ok(());
        }
        let seconds = timeout.to_string();
        self.docker(["stop", "-t", seconds.as_str(), id])?;
        info!(id, timeout, "Stopped container");
        Ok(())
    }

    /// Force-remove `id` along with its anonymous volumes.
    pub fn rm(&self, id: &str) -> Result<()> {
        if !self.is_created(id)? {
            debug!(id, "Not created, not removing");
            return Ok(());
        }
        self.docker(["rm", "-f", "-v", id])?;
        info!(id, "Removed container");
        Ok(())
    }

    pub fn pull(&self, image: &str) -> Result<()> {
        self.docker(["pull", image])?;
        info!(image, "Pulled image");
        Ok(())
    }

    /// The first object of `docker inspect`'s JSON array.
    pub fn inspect_container(&self, id: &str) -> Result<Map<String, Value>> {
        let output = self.docker(["inspect", id])?;
        if output.trim().is_empty() {
            return Err(DriverError::EmptyInspect { id: id.to_string() });
        }

        let mut items: Vec<Map<String, Value>> =
            serde_json::from_str(&output).map_err(|source| DriverError::MalformedJson {
                id: id.to_string(),
                source,
            })?;
        if items.is_empty() {
            return Err(DriverError::EmptyInspect { id: id.to_string() });
        }
        Ok(items.swap_remove(0))
    }

    /// Full ids of every container, stopped ones included.
    pub fn all_containers(&self) -> Result<Vec<String>> {
        let output = self.docker(["ps", "-a", "-q", "--no-trunc"])?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// IPv4 address of the docker bridge interface on the host.
    pub fn docker_bridge_ip(&self) -> Result<String> {
        let args: Vec<String> = ["-4", "addr", "show", "scope", "global"]
            .into_iter()
            .map(str::to_string)
            .chain([self.bridge_interface.clone()])
            .collect();
        let output = self.backend.execute(&self.ip, &args)?;

        parse_bridge_ip(&output).ok_or_else(|| DriverError::NoBridgeIp {
            interface: self.bridge_interface.clone(),
        })
    }
}

fn has_line(output: &str, id: &str) -> bool {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .any(|line| line == id)
}

/// First `inet a.b.c.d/len` address in `ip addr` output.
pub fn parse_bridge_ip(output: &str) -> Option<String> {
    BRIDGE_INET
        .captures(output)
        .map(|captures| captures[1].to_string())
}
