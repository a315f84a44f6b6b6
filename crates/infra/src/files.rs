//! File and artifact helpers

use crate::shell::{command_line, CommandRunner};
use dutkit_core::domain::sysinfo::{ProbeError, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, instrument};

/// `chmod -R <mode> <path>`
#[instrument(skip(runner))]
pub fn change_permissions<R: CommandRunner + ?Sized>(
    runner: &R,
    path: &Path,
    mode: &str,
) -> Result<()> {
    if !path.exists() {
        return Err(ProbeError::InvalidPath(path.to_path_buf()));
    }
    let target = path.to_string_lossy();
    let args = ["-R", mode, &*target];
    let output = runner.run("chmod", &args, None).map_err(|e| ProbeError::Command {
        command: command_line("chmod", &args),
        reason: e.to_string(),
    })?;
    if !output.success {
        return Err(ProbeError::Command {
            command: command_line("chmod", &args),
            reason: output.failure_reason(),
        });
    }
    Ok(())
}

/// Copy `src` over `dest`, replacing an existing file
///
/// When `dest` is a directory the file keeps its name inside it. Copying a
/// file onto itself is rejected. Returns the path written.
pub fn force_copy(src: &Path, dest: &Path) -> Result<PathBuf> {
    let target = if dest.is_dir() {
        let name = src
            .file_name()
            .ok_or_else(|| ProbeError::InvalidPath(src.to_path_buf()))?;
        dest.join(name)
    } else {
        dest.to_path_buf()
    };

    if target.exists() && fs::canonicalize(&target)? == fs::canonicalize(src)? {
        return Err(ProbeError::InvalidPath(target));
    }
    fs::copy(src, &target)?;
    debug!(from = %src.display(), to = %target.display(), "Copied");
    Ok(target)
}

/// Create `parent/name`, refusing to reuse an existing path
pub fn make_dir(parent: &Path, name: &str) -> Result<PathBuf> {
    let path = parent.join(name);
    if path.exists() {
        return Err(ProbeError::AlreadyExists(path));
    }
    fs::create_dir(&path)?;
    Ok(path)
}

/// Newest `Screenshot*` file in `dir` of at least `min_size` bytes
#[instrument]
pub fn confirm_screenshot(dir: &Path, min_size: u64) -> Result<PathBuf> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_name().to_string_lossy().starts_with("Screenshot") {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() || meta.len() < min_size {
            debug!(path = %entry.path().display(), size = meta.len(), "Ignoring screenshot");
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if newest.as_ref().map_or(true, |(t, _)| modified >= *t) {
            newest = Some((modified, entry.path()));
        }
    }

    let (_, path) = newest.ok_or_else(|| {
        ProbeError::NotFound(format!(
            "screenshot of at least {} bytes in {}",
            min_size,
            dir.display()
        ))
    })?;
    info!(path = %path.display(), "Screenshot confirmed");
    Ok(path)
}

fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        // Cross-device moves fall back to copy + delete
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

/// Move every regular file in `downloads` into `dest`
#[instrument]
pub fn move_downloads_to(downloads: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dest)?;
    let mut moved = Vec::new();

    for entry in fs::read_dir(downloads)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let target = dest.join(entry.file_name());
        move_file(&entry.path(), &target)?;
        moved.push(target);
    }

    moved.sort();
    info!(count = moved.len(), dest = %dest.display(), "Moved downloads");
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::scripted::ScriptedRunner;
    use crate::shell::CommandOutput;

    #[test]
    fn test_force_copy_into_directory_and_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tone.wav");
        fs::write(&src, b"RIFF").unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();

        let copied = force_copy(&src, &out).unwrap();
        assert_eq!(copied, out.join("tone.wav"));

        fs::write(&src, b"RIFF2").unwrap();
        let again = force_copy(&src, &copied).unwrap();
        assert_eq!(fs::read(again).unwrap(), b"RIFF2");
    }

    #[test]
    fn test_force_copy_onto_itself_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tone.wav");
        fs::write(&src, b"RIFF").unwrap();

        assert!(matches!(
            force_copy(&src, dir.path()),
            Err(ProbeError::InvalidPath(_))
        ));
        assert!(matches!(force_copy(&src, &src), Err(ProbeError::InvalidPath(_))));
        assert_eq!(fs::read(&src).unwrap(), b"RIFF");
    }

    #[test]
    fn test_make_dir_rejects_existing() {
        let dir = tempfile::tempdir().unwrap();
        let made = make_dir(dir.path(), "captures").unwrap();
        assert!(made.is_dir());
        assert!(matches!(
            make_dir(dir.path(), "captures"),
            Err(ProbeError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_confirm_screenshot() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Screenshot 2024-01-01 10.00.00.png"), vec![0u8; 10]).unwrap();
        fs::write(dir.path().join("notes.txt"), vec![0u8; 5000]).unwrap();

        assert!(matches!(
            confirm_screenshot(dir.path(), 1024),
            Err(ProbeError::NotFound(_))
        ));

        fs::write(dir.path().join("Screenshot 2024-01-01 10.00.05.png"), vec![0u8; 4096]).unwrap();
        let found = confirm_screenshot(dir.path(), 1024).unwrap();
        assert!(found.ends_with("Screenshot 2024-01-01 10.00.05.png"));
    }

    #[test]
    fn test_move_downloads_to() {
        let downloads = tempfile::tempdir().unwrap();
        let results = tempfile::tempdir().unwrap();
        fs::write(downloads.path().join("a.webm"), b"a").unwrap();
        fs::write(downloads.path().join("b.png"), b"b").unwrap();
        fs::create_dir(downloads.path().join("sub")).unwrap();

        let moved = move_downloads_to(downloads.path(), &results.path().join("dl")).unwrap();
        assert_eq!(moved.len(), 2);
        assert!(!downloads.path().join("a.webm").exists());
        assert!(downloads.path().join("sub").is_dir());
    }

    #[test]
    fn test_change_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().to_string_lossy().into_owned();
        let runner = ScriptedRunner::new();
        runner.respond(&format!("chmod -R 777 {}", target), CommandOutput::ok(""));

        change_permissions(&runner, dir.path(), "777").unwrap();
        assert_eq!(runner.calls(), vec![format!("chmod -R 777 {}", target)]);

        assert!(matches!(
            change_permissions(&runner, &dir.path().join("missing"), "777"),
            Err(ProbeError::InvalidPath(_))
        ));
    }
}
