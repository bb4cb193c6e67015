/// Network and resource policy for sandbox runs
use crate::config::settings::RunnerConfig;
use std::fmt;

/// Binary network decision for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkPolicy {
    /// No network at all
    Isolated,
    /// Default bridge network with outbound access
    Open,
}

impl NetworkPolicy {
    /// Open exactly when the request supplied at least one dependency file.
    /// Manifest content never influences the decision.
    pub fn for_dependencies(has_dependencies: bool) -> Self {
        if has_dependencies {
            NetworkPolicy::Open
        } else {
            NetworkPolicy::Isolated
        }
    }

    pub fn as_docker_arg(self) -> &'static str {
        match self {
            NetworkPolicy::Isolated => "none",
            NetworkPolicy::Open => "bridge",
        }
    }
}

impl fmt::Display for NetworkPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkPolicy::Isolated => write!(f, "isolated"),
            NetworkPolicy::Open => write!(f, "open"),
        }
    }
}

/// Fixed per-container ceilings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceLimits {
    pub memory_mb: u64,
    pub cpus: f64,
}

impl ResourceLimits {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            memory_mb: config.memory_limit_mb,
            cpus: config.cpu_limit,
        }
    }

    pub fn docker_args(&self) -> Vec<String> {
        vec![
            format!("--memory={}m", self.memory_mb),
            format!("--cpus={}", self.cpus),
        ]
    }
}
