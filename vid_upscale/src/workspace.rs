//! Work directory layout: `frames/`, `upscaled/`, `res/`.

use shared_utils::{check_dangerous_directory, Result, UpscaleError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDirs {
    pub root: PathBuf,
    pub frames: PathBuf,
    pub upscaled: PathBuf,
    pub results: PathBuf,
}

impl WorkDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            frames: root.join("frames"),
            upscaled: root.join("upscaled"),
            results: root.join("res"),
            root,
        }
    }

    /// Creates the layout and clears stale frames. `res/` is left untouched.
    pub fn prepare(&self) -> Result<()> {
        for dir in [&self.frames, &self.upscaled, &self.results] {
            fs::create_dir_all(dir)?;
        }
        self.clear_transient()
    }

    /// Removes extracted and upscaled frames.
    pub fn cleanup(&self) -> Result<()> {
        self.clear_transient()
    }

    fn clear_transient(&self) -> Result<()> {
        clear_dir(&self.frames)?;
        clear_dir(&self.upscaled)
    }

    pub fn default_output(&self, input: &Path, target_scale: u32) -> PathBuf {
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("upscaled_output");
        self.results.join(format!("{}_x{}.mp4", stem, target_scale))
    }
}

/// Deletes everything inside `dir`, keeping `dir` itself.
///
/// `dir` is always `<root>/frames` or `<root>/upscaled`; the safety check
/// catches those names being symlinks to a system or home directory.
fn clear_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    check_dangerous_directory(dir).map_err(UpscaleError::UnsafeWorkDir)?;

    let mut removed = 0usize;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        removed += 1;
    }
    debug!(dir = %dir.display(), removed, "Cleared work directory");
    Ok(())
}
