//! ---
//! ota_section: "01-core-functionality"
//! ota_subsection: "build"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Emits cargo and git metadata consumed by the version banner."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // No `fail_on_error`: tarball builds have no git metadata and report UNKNOWN.
    EmitBuilder::builder().all_build().all_cargo().all_git().emit()?;

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=OTA_GIT_OVERRIDE");
    Ok(())
}
