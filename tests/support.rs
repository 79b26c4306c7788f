//! ---
//! ota_section: "07-testing"
//! ota_subsection: "integration-tests"
//! ota_type: "source"
//! ota_scope: "test"
//! ota_description: "Simulated device shared by the scenario suites."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use ota_common::AppConfig;
use ota_core::testing::FakePlatform;
use ota_core::Agent;
use serde_json::Value;
use tempfile::TempDir;

/// A device with in-memory system tools and real store files.
pub struct Device {
    pub fakes: FakePlatform,
    pub config: AppConfig,
    _dir: TempDir,
}

impl Device {
    pub fn booted(revision: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let mut config = AppConfig::default();
        config.general.artifacts_path = root.join("artifacts.json");
        config.general.update_status_path = root.join("update-status.json");
        config.general.lock_path = root.join("ota.lock");
        config.os.distro_name = "poky".into();
        config.app.deploy_root = root.join("deploy");
        config.app.uid = None;
        config.app.gid = None;
        config.app.container_stop_timeout = Duration::from_secs(1);
        Self {
            fakes: FakePlatform::booted(revision),
            config,
            _dir: dir,
        }
    }

    pub fn agent(&self) -> Agent {
        Agent::with_platform(&self.config, self.fakes.platform())
    }

    pub fn bundle(&self, name: &str) -> PathBuf {
        self.config.app.deploy_root.join(name)
    }

    pub fn artifacts(&self) -> Value {
        read_json(&self.config.general.artifacts_path)
    }

    pub fn cycles(&self) -> Value {
        read_json(&self.config.general.update_status_path)
    }

    /// The entry for `name` in the update cycle file.
    pub fn cycle(&self, name: &str) -> Value {
        entry(&self.cycles()["UpdateCycles"], "ArtifactName", name)
    }

    /// The entry for `name` in the artifact status file.
    pub fn artifact(&self, name: &str) -> Value {
        entry(&self.artifacts()["Artifacts"], "Name", name)
    }
}

fn read_json(path: &std::path::Path) -> Value {
    let raw = fs::read(path).unwrap_or_else(|err| panic!("failed to read {}: {err}", path.display()));
    serde_json::from_slice(&raw).unwrap()
}

fn entry(list: &Value, key: &str, name: &str) -> Value {
    list.as_array()
        .and_then(|entries| entries.iter().find(|e| e[key] == name))
        .cloned()
        .unwrap_or_else(|| panic!("no entry named {name} in {list}"))
}
