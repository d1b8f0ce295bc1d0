//! Serialises the final command vector to `<bin_dir>/chiplet_commands.json`.
//!
//! The JSON form is an array of command objects, two-space indented, every
//! field always present (defaults serialize as `0`/`-1`/`[]` rather than
//! being omitted) so the downstream schema stays fixed-width.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::descriptor::CommandDescriptor;
use crate::error::EmissionError;

const FILE_NAME: &str = "chiplet_commands.json";

/// Write `commands` to `<bin_dir>/chiplet_commands.json`. Creates `bin_dir`
/// (mode `0o755`) if it doesn't exist. Writes to a temp file in the same
/// directory and renames it into place so a crash never leaves a partial
/// file behind; falls back to a direct write where rename-replace isn't
/// available (e.g. across filesystems).
pub fn emit(commands: &[CommandDescriptor], bin_dir: &Path) -> Result<(), EmissionError> {
    create_dir(bin_dir)?;

    let json = serde_json::to_vec_pretty(commands).map_err(|source| EmissionError::Serialize { source })?;

    let dest = bin_dir.join(FILE_NAME);
    write_atomic(&dest, &json)?;
    log::info!("emitted {} commands to {}", commands.len(), dest.display());
    Ok(())
}

fn create_dir(bin_dir: &Path) -> Result<(), EmissionError> {
    if bin_dir.exists() {
        return Ok(());
    }
    fs::create_dir_all(bin_dir).map_err(|source| EmissionError::CreateDir {
        path: bin_dir.to_path_buf(),
        source,
    })?;
    set_permissions(bin_dir);
    Ok(())
}

#[cfg(unix)]
fn set_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = fs::metadata(path) {
        let mut perms = meta.permissions();
        perms.set_mode(0o755);
        let _ = fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path) {}

fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<(), EmissionError> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let tmp_name = format!(
        ".{}.tmp-{}",
        dest.file_name().and_then(|n| n.to_str()).unwrap_or(FILE_NAME),
        std::process::id()
    );
    let tmp_path = dir.join(tmp_name);

    let write_tmp = || -> Result<(), EmissionError> {
        let mut f = fs::File::create(&tmp_path).map_err(|source| EmissionError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        f.write_all(bytes).map_err(|source| EmissionError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        f.flush().map_err(|source| EmissionError::Write {
            path: tmp_path.clone(),
            source,
        })
    };

    if write_tmp().is_ok() {
        match fs::rename(&tmp_path, dest) {
            Ok(()) => return Ok(()),
            Err(_) => {
                // Cross-filesystem rename can fail; fall through to a direct write.
                let _ = fs::remove_file(&tmp_path);
            }
        }
    } else {
        let _ = fs::remove_file(&tmp_path);
    }

    fs::write(dest, bytes).map_err(|source| EmissionError::Write {
        path: dest.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{CommandKind, Target};

    fn sample() -> Vec<CommandDescriptor> {
        vec![
            CommandDescriptor::new(0, CommandKind::PeTokenPrep, Target::Digital),
            CommandDescriptor::new(1, CommandKind::PeElementwise, Target::Digital).depend_on(0),
        ]
    }

    #[test]
    fn creates_directory_and_writes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let bin_dir = tmp.path().join("out");
        emit(&sample(), &bin_dir).unwrap();
        let path = bin_dir.join(FILE_NAME);
        assert!(path.exists());
    }

    #[test]
    fn every_field_present_even_at_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        emit(&sample(), tmp.path()).unwrap();
        let text = fs::read_to_string(tmp.path().join(FILE_NAME)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        let arr = value.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        for obj in arr {
            for key in ["id", "kind", "target", "chiplet", "unit", "rows", "cols", "k", "bytes", "latency", "flags", "dependencies"] {
                assert!(obj.get(key).is_some(), "missing key {key}");
            }
        }
    }

    #[test]
    fn round_trip_reparse_reemit_is_byte_identical() {
        let tmp = tempfile::tempdir().unwrap();
        emit(&sample(), tmp.path()).unwrap();
        let first = fs::read(tmp.path().join(FILE_NAME)).unwrap();

        let reparsed: Vec<CommandDescriptor> =
            serde_json::from_slice(&first).unwrap();
        let tmp2 = tempfile::tempdir().unwrap();
        emit(&reparsed, tmp2.path()).unwrap();
        let second = fs::read(tmp2.path().join(FILE_NAME)).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn is_two_space_indented() {
        let tmp = tempfile::tempdir().unwrap();
        emit(&sample(), tmp.path()).unwrap();
        let text = fs::read_to_string(tmp.path().join(FILE_NAME)).unwrap();
        assert!(text.contains("\n  {"));
    }
}
