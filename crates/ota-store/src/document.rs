//! ---
//! ota_section: "03-persistence-logging"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Whole-document JSON load and atomic write-back."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace};

use crate::Result;

/// How hard a document write pushes data towards stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    /// Regular write-back at the end of an operation.
    #[default]
    Buffered,
    /// Instant flush: the file and its directory entry are synced before returning.
    Synced,
}

/// Load a document, treating a missing or zero-length file as an empty one.
pub fn load_document<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            trace!(path = %path.display(), "store file absent, starting empty");
            return Ok(T::default());
        }
        Err(err) => return Err(err.into()),
    };
    if file.metadata()?.len() == 0 {
        return Ok(T::default());
    }
    let document = serde_json::from_reader(BufReader::new(file))?;
    Ok(document)
}

/// Persist a document by writing a sibling temporary file and renaming it over `path`.
///
/// Parent directories are created as needed.
pub fn save_document<T>(path: &Path, document: &T, durability: Durability) -> Result<()>
where
    T: Serialize,
{
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        fs::create_dir_all(parent)?;
    }

    let staging = staging_path(path);
    let file = File::create(&staging)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, document)?;
    writer.write_all(b"\n")?;
    let file = writer.into_inner().map_err(|err| err.into_error())?;
    if durability == Durability::Synced {
        file.sync_all()?;
    }
    drop(file);
    fs::rename(&staging, path)?;

    if durability == Durability::Synced {
        if let Some(parent) = parent {
            File::open(parent)?.sync_all()?;
        }
    }
    debug!(path = %path.display(), ?durability, "store document written");
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".tmp");
    path.with_file_name(name)
}
