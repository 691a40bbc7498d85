//! Service identity

/// Version and environment reported in every snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    environment: String,
    version: String,
}

impl VersionInfo {
    /// Identity for `environment`, versioned by the build's git commit
    pub fn new(environment: impl Into<String>) -> Self {
        Self::with_version(environment, short_sha(option_env!("VIGIL_GIT_SHA")))
    }

    /// Identity with an explicit version string
    pub fn with_version(environment: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            version: version.into(),
        }
    }

    /// Deployment environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Version string
    pub fn version(&self) -> &str {
        &self.version
    }
}

fn short_sha(sha: Option<&str>) -> String {
    match sha.map(str::trim) {
        None | Some("") => "unknown".to_string(),
        Some(sha) => sha.chars().take(7).collect(),
    }
}
