//! ---
//! ota_section: "01-core-functionality"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Deploy, run, halt, update, and roll back containerized applications."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
//! Application orchestration.
//!
//! Every application is an OCI bundle checked out from its own branch of the
//! application revision store into `<deploy_root>/<name>` and run as a container
//! named after the application. The bundle also holds the auto-run marker and the
//! captured container output.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use indexmap::IndexSet;
use ota_common::{log_artifact_event, ArtifactLogContext, EventOutcome};
use ota_store::{
    with_trackers, ArtifactKind, ArtifactStatusStore, CompletionState, CycleRecord,
    LazyStoreLock, LifecycleState, UpdateCycleTracker,
};
use serde::Serialize;
use strum::{Display, EnumString};
use tracing::{debug, info, warn};

use crate::agent::{AppSettings, TrackerPaths};
use crate::error::{Result, UpdateError};
use crate::platform::{ContainerRuntime, ContainerState, RevisionStore};
use crate::system::{chown_tree, read_last_lines};

/// Marker file making an application start whenever it is deployed.
pub const AUTORUN_MARKER: &str = "autorun";
/// Captured container stdout.
pub const LOG_OUT_FILE: &str = "log.out";
/// Captured container stderr.
pub const LOG_ERR_FILE: &str = "log.err";
pub const DEFAULT_LOG_LINES: usize = 20;

const KIND: ArtifactKind = ArtifactKind::Application;

/// Whether an application is started automatically after deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum RunMode {
    Manual,
    Auto,
}

/// Tail of an application's captured output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppLogs {
    pub stdout: String,
    pub stderr: String,
}

pub struct AppOrchestrator<'a> {
    settings: &'a AppSettings,
    paths: &'a TrackerPaths,
    revisions: &'a dyn RevisionStore,
    runtime: &'a dyn ContainerRuntime,
    lock: &'a LazyStoreLock,
}

impl<'a> AppOrchestrator<'a> {
    pub fn new(
        settings: &'a AppSettings,
        paths: &'a TrackerPaths,
        revisions: &'a dyn RevisionStore,
        runtime: &'a dyn ContainerRuntime,
        lock: &'a LazyStoreLock,
    ) -> Self {
        Self {
            settings,
            paths,
            revisions,
            runtime,
            lock,
        }
    }

    /// Application branches of the revision store.
    pub fn branches(&self) -> Result<Vec<String>> {
        self.revisions.list_branches()
    }

    /// Head revision of the branch of `name`.
    pub fn branch_head(&self, name: &str) -> Result<Option<String>> {
        self.revisions.resolve(name)
    }

    /// Names of registered applications followed by the branches not deployed yet.
    pub fn known_applications(&self, store: &ArtifactStatusStore) -> Result<Vec<String>> {
        let mut names: IndexSet<String> = store
            .artifacts_of(KIND)
            .map(|artifact| artifact.name.clone())
            .collect();
        names.extend(self.branches()?);
        Ok(names.into_iter().collect())
    }

    /// (Re)deploy every known application, starting the auto-run ones.
    ///
    /// A failing application does not stop the batch.
    pub fn deploy_all(&self) -> Result<()> {
        self.lock.hold()?;
        ArtifactStatusStore::scoped(&self.paths.artifacts, |store| {
            let mut failed = Vec::new();
            for name in self.known_applications(store)? {
                let outcome = self.deploy(store, &name);
                if self.finish(store, &name, "deploy or run", None, outcome).is_err() {
                    failed.push(name);
                }
            }
            if failed.is_empty() {
                Ok(())
            } else {
                Err(UpdateError::Batch {
                    operation: "deploy or run",
                    failed,
                })
            }
        })
    }

    fn deploy(&self, store: &mut ArtifactStatusStore, name: &str) -> Result<()> {
        let revision = match store.get(name, KIND) {
            Some(artifact) if !artifact.deployed_revision.is_empty() => {
                artifact.deployed_revision.clone()
            }
            _ => self.branch_head(name)?.ok_or_else(|| {
                UpdateError::Store(format!("No revision available for application '{name}'"))
            })?,
        };
        info!(application = name, %revision, "deploying application");
        store.record_artifact(name, KIND, &revision, None, LifecycleState::Available);

        self.stop_container(name)?;
        self.replace_bundle(name, &revision)?;
        store.amend_lifecycle(name, KIND, Some(LifecycleState::Ready), true, None)?;

        if self.run_mode(name) == RunMode::Auto {
            self.start_container(name)?;
            store.amend_lifecycle(name, KIND, Some(LifecycleState::Running), true, None)?;
        }
        Ok(())
    }

    /// Switch auto-run on or off for a deployed application.
    pub fn configure(&self, name: &str, mode: RunMode) -> Result<()> {
        self.scoped(name, "configure", |_| {
            let bundle = self.deployed_bundle(name)?;
            let marker = bundle.join(AUTORUN_MARKER);
            set_marker(&marker, mode)?;
            info!(application = name, %mode, "run mode configured");
            Ok(())
        })
    }

    /// Start a deployed application unless it already runs.
    pub fn run(&self, name: &str) -> Result<LifecycleState> {
        self.scoped(name, "run", |store| {
            self.start_container(name)?;
            store.amend_lifecycle(name, KIND, Some(LifecycleState::Running), true, None)?;
            Ok(LifecycleState::Running)
        })
    }

    /// Stop a running application and remove its container.
    pub fn halt(&self, name: &str) -> Result<()> {
        self.scoped(name, "halt", |store| {
            self.stop_container(name)?;
            store.amend_lifecycle(name, KIND, Some(LifecycleState::Ready), true, None)?;
            Ok(())
        })
    }

    /// Lifecycle state derived from the container runtime and the bundle.
    pub fn get_state(&self, name: &str) -> Result<LifecycleState> {
        Ok(match self.runtime.state(name)? {
            Some(ContainerState::Running) => LifecycleState::Running,
            Some(ContainerState::Stopped) => LifecycleState::Finished,
            Some(ContainerState::Created) => LifecycleState::Ready,
            None if self.bundle(name).is_dir() => LifecycleState::Ready,
            None => LifecycleState::Available,
        })
    }

    /// Last `max_lines` lines of the captured stdout and stderr.
    pub fn read_logs(&self, name: &str, max_lines: usize) -> Result<AppLogs> {
        let bundle = self.deployed_bundle(name)?;
        Ok(AppLogs {
            stdout: read_last_lines(&bundle.join(LOG_OUT_FILE), max_lines)?,
            stderr: read_last_lines(&bundle.join(LOG_ERR_FILE), max_lines)?,
        })
    }

    /// Move a registered application to `revision`, keeping the current one as
    /// rollback target.
    pub fn update(&self, name: &str, revision: &str) -> Result<()> {
        self.lock.hold()?;
        with_trackers(
            &self.paths.artifacts,
            &self.paths.update_status,
            |store, cycles| {
                cycles.record_cycle(
                    name,
                    KIND,
                    CycleRecord::state(CompletionState::Initiated).with_revision(revision),
                );
                let outcome = self.update_steps(store, cycles, name, revision);
                self.finish(store, name, "update", Some(cycles), outcome)
            },
        )
    }

    fn update_steps(
        &self,
        store: &mut ArtifactStatusStore,
        cycles: &mut UpdateCycleTracker,
        name: &str,
        revision: &str,
    ) -> Result<()> {
        let current = store
            .get(name, KIND)
            .map(|artifact| artifact.deployed_revision.as_str());
        if current == Some(revision) {
            return Err(UpdateError::Precondition(
                "Cannot update application towards the same revision that is already in use"
                    .to_owned(),
            ));
        }

        self.stop_container(name)?;
        store.amend_lifecycle(name, KIND, Some(LifecycleState::Ready), true, None)?;

        self.revisions.pull(name, revision)?;
        cycles.record_cycle(name, KIND, CycleRecord::state(CompletionState::Downloaded));
        // Application revisions carry no verification step yet.
        cycles.record_cycle(name, KIND, CycleRecord::state(CompletionState::Verified));

        self.replace_bundle(name, revision)?;
        store.amend_revision(name, KIND, revision, true)?;
        cycles.record_cycle(name, KIND, CycleRecord::state(CompletionState::Applied));

        self.restart_if_auto(store, name)?;
        cycles.record_cycle(
            name,
            KIND,
            CycleRecord::state(CompletionState::Confirmed)
                .with_message("Application update successfully completed"),
        );
        Ok(())
    }

    /// Return to the rollback revision. Only one level of rollback is kept.
    pub fn roll_back(&self, name: &str) -> Result<()> {
        self.lock.hold()?;
        with_trackers(
            &self.paths.artifacts,
            &self.paths.update_status,
            |store, cycles| {
                let target = store
                    .get(name, KIND)
                    .and_then(|artifact| artifact.rollback_revision.clone())
                    .ok_or_else(|| {
                        UpdateError::Precondition(format!(
                            "Application '{name}' has nothing to roll back to"
                        ))
                    });
                let outcome = match target {
                    Ok(target) => self.roll_back_steps(store, cycles, name, &target),
                    Err(err) => return self.finish(store, name, "roll back", None, Err(err)),
                };
                self.finish(store, name, "roll back", Some(cycles), outcome)
            },
        )
    }

    fn roll_back_steps(
        &self,
        store: &mut ArtifactStatusStore,
        cycles: &mut UpdateCycleTracker,
        name: &str,
        target: &str,
    ) -> Result<()> {
        cycles.record_cycle(
            name,
            KIND,
            CycleRecord::state(CompletionState::Initiated).with_revision(target),
        );
        self.stop_container(name)?;
        store.amend_lifecycle(name, KIND, Some(LifecycleState::Ready), true, None)?;

        self.replace_bundle(name, target)?;
        store.amend_revision(name, KIND, target, false)?;

        self.restart_if_auto(store, name)?;
        cycles.record_cycle(
            name,
            KIND,
            CycleRecord::state(CompletionState::RolledBack)
                .with_message("Application rolled back to previous revision"),
        );
        Ok(())
    }

    /// Stop the application, remove its bundle, and forget it.
    pub fn delete(&self, name: &str) -> Result<()> {
        self.scoped(name, "delete", |store| {
            let bundle = self.bundle(name);
            let deployed = bundle.exists();
            if !deployed && store.get(name, KIND).is_none() {
                return Err(UpdateError::Precondition(format!(
                    "Application '{name}' is unknown"
                )));
            }
            self.stop_container(name)?;
            if deployed {
                fs::remove_dir_all(&bundle)
                    .map_err(|err| UpdateError::io_at("remove", &bundle, err))?;
            }
            store.erase_artifact(name, KIND);
            info!(application = name, "application deleted");
            Ok(())
        })
    }

    /// Current run mode, read from the bundle.
    pub fn run_mode(&self, name: &str) -> RunMode {
        if self.bundle(name).join(AUTORUN_MARKER).exists() {
            RunMode::Auto
        } else {
            RunMode::Manual
        }
    }

    fn bundle(&self, name: &str) -> PathBuf {
        self.settings.bundle_dir(name)
    }

    fn deployed_bundle(&self, name: &str) -> Result<PathBuf> {
        let bundle = self.bundle(name);
        if bundle.is_dir() {
            Ok(bundle)
        } else {
            Err(UpdateError::Precondition(format!(
                "Application '{name}' has not been deployed"
            )))
        }
    }

    fn restart_if_auto(&self, store: &mut ArtifactStatusStore, name: &str) -> Result<()> {
        if self.run_mode(name) == RunMode::Auto {
            self.start_container(name)?;
            store.amend_lifecycle(name, KIND, Some(LifecycleState::Running), true, None)?;
        }
        Ok(())
    }

    /// Check `revision` out as the bundle of `name`.
    ///
    /// The checkout lands next to the bundle first and replaces it once complete.
    /// An existing bundle passes its run mode on to the new one.
    fn replace_bundle(&self, name: &str, revision: &str) -> Result<()> {
        let bundle = self.bundle(name);
        let staging = self.settings.deploy_root.join(format!(".{name}.checkout"));
        if staging.exists() {
            fs::remove_dir_all(&staging)
                .map_err(|err| UpdateError::io_at("remove", &staging, err))?;
        }
        fs::create_dir_all(&self.settings.deploy_root)
            .map_err(|err| UpdateError::io_at("create", &self.settings.deploy_root, err))?;

        debug!(application = name, revision, "checking out bundle");
        self.revisions.checkout(revision, &staging)?;

        if bundle.exists() {
            set_marker(&staging.join(AUTORUN_MARKER), self.run_mode(name))?;
            fs::remove_dir_all(&bundle).map_err(|err| UpdateError::io_at("remove", &bundle, err))?;
        }
        fs::rename(&staging, &bundle).map_err(|err| UpdateError::io_at("install", &bundle, err))?;

        if let Some((uid, gid)) = self.settings.owner {
            chown_tree(&bundle, uid, gid)?;
        }
        Ok(())
    }

    fn start_container(&self, name: &str) -> Result<()> {
        let bundle = self.deployed_bundle(name)?;
        match self.runtime.state(name)? {
            Some(ContainerState::Running) => {
                debug!(application = name, "already running");
                return Ok(());
            }
            Some(ContainerState::Created) => {
                return Err(UpdateError::Precondition(format!(
                    "Container '{name}' is created but not started; halt it before running it again"
                )));
            }
            Some(ContainerState::Stopped) => self.runtime.delete(name)?,
            None => {}
        }
        info!(application = name, "starting application");
        self.runtime.run(name, &bundle)
    }

    fn stop_container(&self, name: &str) -> Result<()> {
        let Some(state) = self.runtime.state(name)? else {
            return Ok(());
        };
        if state == ContainerState::Running {
            info!(application = name, "stopping application");
            self.runtime.kill(name)?;
            let deadline = Instant::now() + self.settings.stop_timeout;
            while self.runtime.state(name)? == Some(ContainerState::Running) {
                if Instant::now() >= deadline {
                    return Err(UpdateError::external(
                        "runtime",
                        format!(
                            "Container '{name}' did not stop within {}s",
                            self.settings.stop_timeout.as_secs()
                        ),
                    ));
                }
                thread::sleep(self.settings.poll_interval);
            }
        }
        self.runtime.delete(name)
    }

    fn scoped<T, F>(&self, name: &str, operation: &'static str, op: F) -> Result<T>
    where
        F: FnOnce(&mut ArtifactStatusStore) -> Result<T>,
    {
        self.lock.hold()?;
        ArtifactStatusStore::scoped(&self.paths.artifacts, |store| {
            let outcome = op(store);
            self.finish(store, name, operation, None, outcome)
        })
    }

    /// Record and log the outcome of a single-application operation.
    fn finish<T>(
        &self,
        store: &mut ArtifactStatusStore,
        name: &str,
        operation: &'static str,
        cycles: Option<&mut UpdateCycleTracker>,
        outcome: Result<T>,
    ) -> Result<T> {
        let kind = KIND.to_string();
        let context = ArtifactLogContext::new(name, &kind);
        match outcome {
            Ok(value) => {
                log_artifact_event(&context, operation, "completed", EventOutcome::Success);
                Ok(value)
            }
            Err(err) => {
                let message = err.chain_message();
                if let Err(record_err) = store.amend_lifecycle(name, KIND, None, false, Some(&message)) {
                    debug!(error = %record_err, "failure not recorded");
                }
                if let Some(cycles) = cycles {
                    cycles.record_cycle(name, KIND, CycleRecord::failure(&message));
                }
                log_artifact_event(&context, operation, &message, EventOutcome::Fault);
                Err(UpdateError::artifact(name, KIND, operation, err))
            }
        }
    }
}

fn set_marker(marker: &Path, mode: RunMode) -> Result<()> {
    let outcome = match mode {
        RunMode::Auto => fs::write(marker, ""),
        RunMode::Manual => match fs::remove_file(marker) {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        },
    };
    outcome.map_err(|err| {
        warn!(marker = %marker.display(), error = %err, "unable to change run mode");
        UpdateError::io_at("update", marker, err)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePlatform;
    use std::time::Duration;

    struct Fixture {
        platform: FakePlatform,
        settings: AppSettings,
        paths: TrackerPaths,
        lock: LazyStoreLock,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            Self {
                platform: FakePlatform::default(),
                settings: AppSettings {
                    deploy_root: dir.path().join("deploy"),
                    owner: None,
                    stop_timeout: Duration::from_millis(50),
                    poll_interval: Duration::from_millis(5),
                },
                paths: TrackerPaths {
                    artifacts: dir.path().join("artifacts.json"),
                    update_status: dir.path().join("update-status.json"),
                },
                lock: LazyStoreLock::new(dir.path().join("ota.lock")),
                _dir: dir,
            }
        }

        fn apps(&self) -> AppOrchestrator<'_> {
            AppOrchestrator::new(
                &self.settings,
                &self.paths,
                self.platform.app_revisions.as_ref(),
                self.platform.runtime.as_ref(),
                &self.lock,
            )
        }

        fn artifact(&self, name: &str) -> ota_store::Artifact {
            ArtifactStatusStore::open(&self.paths.artifacts)
                .unwrap()
                .get(name, KIND)
                .cloned()
                .unwrap()
        }

        fn cycle(&self, name: &str) -> ota_store::UpdateCycle {
            UpdateCycleTracker::open(&self.paths.update_status)
                .unwrap()
                .get(name, KIND)
                .cloned()
                .unwrap()
        }

        fn deployed(&self, name: &str) -> String {
            fs::read_to_string(self.settings.bundle_dir(name).join("REVISION")).unwrap()
        }
    }

    #[test]
    fn deploy_all_checks_out_every_branch_and_starts_autorun_ones() {
        let fx = Fixture::new();
        fx.platform.app_revisions.add_revision("web", "w1");
        fx.platform.app_revisions.add_revision("db", "d1");
        fx.platform.app_revisions.ship_autorun("w1");

        fx.apps().deploy_all().unwrap();

        assert_eq!(fx.deployed("web"), "w1");
        assert_eq!(fx.deployed("db"), "d1");
        assert_eq!(fx.platform.runtime.started(), ["web"]);
        assert_eq!(fx.artifact("web").lifecycle_state, LifecycleState::Running);
        assert_eq!(fx.artifact("db").lifecycle_state, LifecycleState::Ready);
    }

    #[test]
    fn deploy_all_continues_past_a_failing_application() {
        let fx = Fixture::new();
        for (name, revision) in [("a", "a1"), ("b", "b1"), ("c", "c1")] {
            fx.platform.app_revisions.add_revision(name, revision);
            fx.platform.app_revisions.ship_autorun(revision);
        }
        fx.platform.runtime.fail_run("b");

        let err = fx.apps().deploy_all().unwrap_err();
        match &err {
            UpdateError::Batch { failed, .. } => assert_eq!(failed, &["b".to_owned()]),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.to_string().contains("describe-artifacts"));

        assert_eq!(fx.platform.runtime.started(), ["a", "c"]);
        let b = fx.artifact("b");
        assert!(!b.status);
        assert!(b.message.unwrap().contains("exec format error"));
        assert!(fx.artifact("c").status);
    }

    #[test]
    fn redeploy_keeps_rolled_back_revision_and_run_mode() {
        let fx = Fixture::new();
        fx.platform.app_revisions.add_revision("web", "w1");
        fx.apps().deploy_all().unwrap();
        fx.apps().configure("web", RunMode::Auto).unwrap();

        fx.platform.app_revisions.add_revision("web", "w2");
        fx.apps().deploy_all().unwrap();

        assert_eq!(fx.deployed("web"), "w1");
        assert_eq!(fx.apps().run_mode("web"), RunMode::Auto);
        assert_eq!(fx.platform.runtime.state_of("web"), Some(ContainerState::Running));
    }

    #[test]
    fn run_and_halt_track_lifecycle() {
        let fx = Fixture::new();
        fx.platform.app_revisions.add_revision("web", "w1");
        fx.apps().deploy_all().unwrap();

        assert_eq!(fx.apps().run("web").unwrap(), LifecycleState::Running);
        assert_eq!(fx.apps().get_state("web").unwrap(), LifecycleState::Running);
        // Running twice is a no-op.
        fx.apps().run("web").unwrap();
        assert_eq!(fx.platform.runtime.started().len(), 1);

        fx.apps().halt("web").unwrap();
        assert_eq!(fx.platform.runtime.state_of("web"), None);
        assert_eq!(fx.apps().get_state("web").unwrap(), LifecycleState::Ready);
        assert_eq!(fx.artifact("web").lifecycle_state, LifecycleState::Ready);
    }

    #[test]
    fn state_follows_runtime() {
        let fx = Fixture::new();
        assert_eq!(fx.apps().get_state("web").unwrap(), LifecycleState::Available);
        fx.platform.runtime.set_state("web", Some(ContainerState::Stopped));
        assert_eq!(fx.apps().get_state("web").unwrap(), LifecycleState::Finished);
        fx.platform.runtime.set_state("web", Some(ContainerState::Created));
        assert_eq!(fx.apps().get_state("web").unwrap(), LifecycleState::Ready);
    }

    #[test]
    fn finished_container_is_recreated_on_run() {
        let fx = Fixture::new();
        fx.platform.app_revisions.add_revision("job", "j1");
        fx.apps().deploy_all().unwrap();
        fx.platform.runtime.set_state("job", Some(ContainerState::Stopped));

        fx.apps().run("job").unwrap();
        assert_eq!(fx.platform.runtime.state_of("job"), Some(ContainerState::Running));
    }

    #[test]
    fn run_unknown_application_records_nothing_and_fails() {
        let fx = Fixture::new();
        let err = fx.apps().run("ghost").unwrap_err();
        assert_eq!(err.to_string(), "failed to run Application 'ghost'");
        assert!(err.chain_message().contains("has not been deployed"));
        assert!(ArtifactStatusStore::open(&fx.paths.artifacts)
            .unwrap()
            .artifacts()
            .is_empty());
    }

    #[test]
    fn logs_are_read_from_bundle() {
        let fx = Fixture::new();
        fx.platform.app_revisions.add_revision("web", "w1");
        fx.apps().deploy_all().unwrap();
        fx.apps().run("web").unwrap();

        let logs = fx.apps().read_logs("web", DEFAULT_LOG_LINES).unwrap();
        assert_eq!(logs.stdout, "web started");
        assert_eq!(logs.stderr, "");
    }

    #[test]
    fn update_then_roll_back() {
        let fx = Fixture::new();
        fx.platform.app_revisions.add_revision("web", "w1");
        fx.platform.app_revisions.ship_autorun("w1");
        fx.apps().deploy_all().unwrap();

        fx.apps().update("web", "w2").unwrap();
        assert_eq!(fx.deployed("web"), "w2");
        let web = fx.artifact("web");
        assert_eq!(web.deployed_revision, "w2");
        assert_eq!(web.rollback_revision.as_deref(), Some("w1"));
        assert_eq!(web.lifecycle_state, LifecycleState::Running);
        let cycle = fx.cycle("web");
        assert_eq!(cycle.revision.as_deref(), Some("w2"));
        assert_eq!(cycle.completion_state, Some(CompletionState::Confirmed));
        assert_eq!(fx.platform.app_revisions.pulled(), [("web".to_owned(), "w2".to_owned())]);

        fx.apps().roll_back("web").unwrap();
        assert_eq!(fx.deployed("web"), "w1");
        let web = fx.artifact("web");
        assert_eq!(web.deployed_revision, "w1");
        assert_eq!(web.rollback_revision, None);
        let cycle = fx.cycle("web");
        assert_eq!(cycle.completion_state, Some(CompletionState::RolledBack));
        assert_eq!(cycle.revision.as_deref(), Some("w1"));
        assert_eq!(
            cycle.message.as_deref(),
            Some("Application rolled back to previous revision")
        );

        let err = fx.apps().roll_back("web").unwrap_err();
        assert!(err.chain_message().contains("nothing to roll back to"));
        assert_eq!(fx.cycle("web").completion_state, Some(CompletionState::RolledBack));
    }

    #[test]
    fn failed_update_is_recorded_on_lifecycle_and_cycle() {
        let fx = Fixture::new();
        fx.platform.app_revisions.add_revision("web", "w1");
        fx.apps().deploy_all().unwrap();
        fx.platform.app_revisions.fail_pull("w2");

        let err = fx.apps().update("web", "w2").unwrap_err();
        assert_eq!(err.to_string(), "failed to update Application 'web'");

        let web = fx.artifact("web");
        assert!(!web.status);
        assert_eq!(web.deployed_revision, "w1");
        let cycle = fx.cycle("web");
        assert!(!cycle.status);
        assert_eq!(cycle.completion_state, Some(CompletionState::Initiated));
        assert!(cycle.message.unwrap().contains("Unable to pull revision 'w2'"));
    }

    #[test]
    fn update_unregistered_application_fails() {
        let fx = Fixture::new();
        let err = fx.apps().update("ghost", "g1").unwrap_err();
        assert!(err.chain_message().contains("unregistered"), "{}", err.chain_message());
    }

    #[test]
    fn failed_checkout_during_update_keeps_previous_bundle() {
        let fx = Fixture::new();
        fx.platform.app_revisions.add_revision("web", "w1");
        fx.apps().deploy_all().unwrap();
        fx.platform.app_revisions.fail_checkout("w2");

        let err = fx.apps().update("web", "w2").unwrap_err();
        assert!(err.chain_message().contains("Unable to check out revision 'w2'"));
        assert_eq!(fx.deployed("web"), "w1");

        let web = fx.artifact("web");
        assert!(!web.status);
        assert_eq!(web.deployed_revision, "w1");
        assert_eq!(web.lifecycle_state, LifecycleState::Ready);
        let cycle = fx.cycle("web");
        assert_eq!(cycle.revision.as_deref(), Some("w2"));
        assert_eq!(cycle.completion_state, Some(CompletionState::Verified));
        assert!(!cycle.status);
        assert!(cycle.message.unwrap().contains("Unable to check out revision 'w2'"));
    }

    #[test]
    fn failed_checkout_during_roll_back_is_recorded_against_its_target() {
        let fx = Fixture::new();
        fx.platform.app_revisions.add_revision("web", "w1");
        fx.apps().deploy_all().unwrap();
        fx.apps().update("web", "w2").unwrap();
        fx.platform.app_revisions.fail_checkout("w1");

        let err = fx.apps().roll_back("web").unwrap_err();
        assert_eq!(err.to_string(), "failed to roll back Application 'web'");
        assert_eq!(fx.deployed("web"), "w2");

        let web = fx.artifact("web");
        assert!(!web.status);
        assert_eq!(web.deployed_revision, "w2");
        assert_eq!(web.rollback_revision.as_deref(), Some("w1"));
        let cycle = fx.cycle("web");
        assert_eq!(cycle.revision.as_deref(), Some("w1"));
        assert_eq!(cycle.completion_state, Some(CompletionState::Initiated));
        assert!(!cycle.status);
        assert!(cycle.message.unwrap().contains("Unable to check out revision 'w1'"));
    }

    #[test]
    fn mutating_operations_take_the_store_lock() {
        let fx = Fixture::new();
        fx.platform.app_revisions.add_revision("web", "w1");
        let other = LazyStoreLock::new(fx.lock.path());
        other.hold().unwrap();

        let err = fx.apps().deploy_all().unwrap_err();
        assert!(err.to_string().contains("another update agent instance"));
        assert!(!fx.paths.artifacts.exists());
        // Reads do not need it.
        assert_eq!(fx.apps().get_state("web").unwrap(), LifecycleState::Available);

        drop(other);
        fx.apps().deploy_all().unwrap();
        assert!(fx.lock.is_held());
    }

    #[test]
    fn halt_times_out_on_unkillable_container() {
        struct Stubborn(crate::testing::FakeRuntime);
        impl ContainerRuntime for Stubborn {
            fn state(&self, id: &str) -> Result<Option<ContainerState>> {
                self.0.state(id)
            }
            fn run(&self, id: &str, bundle: &Path) -> Result<()> {
                self.0.run(id, bundle)
            }
            fn kill(&self, _id: &str) -> Result<()> {
                Ok(())
            }
            fn delete(&self, id: &str) -> Result<()> {
                self.0.delete(id)
            }
        }

        let fx = Fixture::new();
        let runtime = Stubborn(Default::default());
        runtime.0.set_state("web", Some(ContainerState::Running));
        let apps = AppOrchestrator::new(
            &fx.settings,
            &fx.paths,
            fx.platform.app_revisions.as_ref(),
            &runtime,
            &fx.lock,
        );
        let err = apps.halt("web").unwrap_err();
        assert!(err.chain_message().contains("did not stop within"));
        assert_eq!(runtime.0.state_of("web"), Some(ContainerState::Running));
    }

    #[test]
    fn delete_removes_bundle_and_record() {
        let fx = Fixture::new();
        fx.platform.app_revisions.add_revision("web", "w1");
        fx.apps().deploy_all().unwrap();
        fx.apps().run("web").unwrap();

        fx.apps().delete("web").unwrap();
        assert!(!fx.settings.bundle_dir("web").exists());
        assert_eq!(fx.platform.runtime.state_of("web"), None);
        assert!(ArtifactStatusStore::open(&fx.paths.artifacts)
            .unwrap()
            .get("web", KIND)
            .is_none());
        assert!(fx.apps().delete("web").is_err());
    }
}
