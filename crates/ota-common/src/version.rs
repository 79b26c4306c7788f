//! ---
//! ota_section: "06-versioning-updates"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Build metadata exposed through --version flags and logs."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use once_cell::sync::Lazy;

static CURRENT: Lazy<VersionInfo> = Lazy::new(|| VersionInfo {
    semver: env!("CARGO_PKG_VERSION").to_owned(),
    git_sha: option_env!("VERGEN_GIT_SHA").unwrap_or("UNKNOWN").to_owned(),
    build_timestamp: option_env!("VERGEN_BUILD_TIMESTAMP")
        .unwrap_or("UNKNOWN")
        .to_owned(),
    target: option_env!("VERGEN_CARGO_TARGET_TRIPLE")
        .unwrap_or("UNKNOWN")
        .to_owned(),
    profile: option_env!("VERGEN_CARGO_OPT_LEVEL")
        .map(|level| format!("opt-level {level}"))
        .unwrap_or_else(|| "UNKNOWN".to_owned()),
});

/// Build information captured at compile time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    /// Workspace semantic version.
    pub semver: String,
    /// Git commit hash captured at build time.
    pub git_sha: String,
    /// Build timestamp from the compilation environment.
    pub build_timestamp: String,
    /// Target triple used for the build.
    pub target: String,
    /// Optimisation profile used during compilation.
    pub profile: String,
}

impl VersionInfo {
    #[must_use]
    pub fn current() -> Self {
        CURRENT.clone()
    }

    /// Human readable banner used in logging surfaces.
    #[must_use]
    pub fn banner(&self) -> String {
        format!("OTA agent v{} (git {})", self.semver, self.git_sha)
    }

    /// Extended string containing build metadata suitable for `--version` flags.
    #[must_use]
    pub fn extended(&self) -> String {
        format!(
            "{banner}\nBuilt: {built}\nTarget: {target}\nProfile: {profile}",
            banner = self.banner(),
            built = self.build_timestamp,
            target = self.target,
            profile = self.profile
        )
    }
}
