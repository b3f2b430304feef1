use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub invoke: InvokeConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Limits applied to every snippet evaluation.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SandboxConfig {
    /// Evaluation steps one invocation may consume
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,
    /// Nesting limit for user function calls
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct InvokeConfig {
    /// Wall-clock deadline per invocation, 0 = wait forever
    #[serde(default)]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CatalogConfig {
    /// Protocol offered for frameworks without their own list
    #[serde(default = "default_protocol")]
    pub default_protocol: String,
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    #[serde(default = "default_frameworks")]
    pub frameworks: Vec<FrameworkConfig>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct FrameworkConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub protocols: Vec<String>,
}

fn default_max_steps() -> u64 {
    1_000_000
}

fn default_max_call_depth() -> usize {
    128
}

fn default_protocol() -> String {
    "tcp".to_string()
}

fn default_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE"].map(String::from).to_vec()
}

fn default_frameworks() -> Vec<FrameworkConfig> {
    let framework = |id: &str, name: &str, protocols: &[&str]| FrameworkConfig {
        id: id.to_string(),
        name: name.to_string(),
        protocols: protocols.iter().map(|p| p.to_string()).collect(),
    };
    vec![
        framework("grpc", "gRPC", &["tcp", "udp"]),
        framework("rmi", "Java RMI", &["tcp"]),
        framework("netremoting", ".NET Remoting", &["tcp"]),
    ]
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_call_depth: default_max_call_depth(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            default_protocol: default_protocol(),
            methods: default_methods(),
            frameworks: default_frameworks(),
        }
    }
}

impl InvokeConfig {
    pub fn timeout(&self) -> Option<std::time::Duration> {
        (self.timeout_ms > 0).then(|| std::time::Duration::from_millis(self.timeout_ms))
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // Expand environment variables like ${RPC_LAB_MAX_STEPS}
        let expanded = shellexpand::env(&content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
