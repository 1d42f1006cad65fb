//! Service configuration
//!
//! Loaded from YAML (JSON works too). Unknown fields are rejected so typos
//! surface at startup rather than as silently ignored settings.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Listen address of the HTTP API
    #[serde(default = "default_address")]
    pub address: String,
    /// Grace period for a clean shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_address() -> String { "0.0.0.0:8080".to_string() }
fn default_shutdown_timeout() -> u64 { 30 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxConfig {
    #[serde(default)]
    pub kernels: Vec<KernelConfig>,
}

/// One named kernel pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KernelConfig {
    /// Pool name, matched case-insensitively
    pub name: String,
    /// Kernelspec to start; defaults to the pool name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<String>,
    /// Source run once on every new kernel before it is handed out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<String>,
    #[serde(default = "default_min")]
    pub min: usize,
    #[serde(default = "default_max")]
    pub max: usize,
    pub gateway: GatewayConfig,
}

fn default_min() -> usize { 1 }
fn default_max() -> usize { 4 }

impl KernelConfig {
    pub fn new(name: impl Into<String>, gateway: GatewayConfig) -> Self {
        Self {
            name: name.into().to_lowercase(),
            kernel: None,
            init: None,
            min: default_min(),
            max: default_max(),
            gateway,
        }
    }

    pub fn kernel(mut self, kernel: impl Into<String>) -> Self {
        self.kernel = Some(kernel.into());
        self
    }

    pub fn init(mut self, source: impl Into<String>) -> Self {
        self.init = Some(source.into());
        self
    }

    pub fn min(mut self, n: usize) -> Self {
        self.min = n;
        self
    }

    pub fn max(mut self, n: usize) -> Self {
        self.max = n;
        self
    }

    /// Kernelspec name sent to the gateway.
    pub fn kernelspec(&self) -> &str {
        self.kernel.as_deref().unwrap_or(&self.name)
    }

    fn problems(&self, out: &mut Vec<String>) {
        if self.name.trim().is_empty() {
            out.push("kernel name cannot be empty".into());
        }
        if self.max == 0 {
            out.push(format!("{}: max must be at least 1", self.name));
        }
        if self.min > self.max {
            out.push(format!("{}: min ({}) exceeds max ({})", self.name, self.min, self.max));
        }
        match Url::parse(&self.gateway.address) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => out.push(format!(
                "{}: unsupported gateway scheme {}",
                self.name,
                url.scheme()
            )),
            Err(e) => out.push(format!(
                "{}: invalid gateway address {}: {}",
                self.name, self.gateway.address, e
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Base URL of the Jupyter server, e.g. `http://jupyter:8888`
    pub address: String,
    #[serde(default)]
    pub token: String,
    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_request_timeout() -> u64 { 30 }

impl GatewayConfig {
    pub fn new(address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: token.into(),
            timeout_secs: default_request_timeout(),
        }
    }
}

impl SandboxConfig {
    pub fn validate(&self) -> crate::Result<()> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();

        for kernel in &self.kernels {
            if !seen.insert(kernel.name.to_lowercase()) {
                problems.push(format!("duplicate kernel name: {}", kernel.name));
            }
            kernel.problems(&mut problems);
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(crate::Error::Config(problems.join("; ")))
        }
    }
}

impl Config {
    /// Read, parse and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> crate::Result<Self> {
        let mut config: Config = serde_yaml::from_str(text)?;
        for kernel in &mut config.sandbox.kernels {
            kernel.name = kernel.name.to_lowercase();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.sandbox.validate()
    }
}
