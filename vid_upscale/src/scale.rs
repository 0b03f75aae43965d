//! Multi-pass planning for fixed-ratio upscalers.
//!
//! A model with native ratio `base` reaches `target` only when
//! `base.pow(passes) == target`.

use shared_utils::{Result, UpscaleError};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalePlan {
    pub base: u32,
    pub target: u32,
    pub passes: u32,
}

/// Number of native-ratio passes needed to reach `target`.
pub fn plan_passes(base: u32, target: u32) -> Result<u32> {
    let unsupported = || UpscaleError::UnsupportedScale { target, base };

    if base < 2 || target < base {
        return Err(unsupported());
    }

    let mut reached = base;
    let mut passes = 1;
    while reached < target {
        reached = reached.checked_mul(base).ok_or_else(unsupported)?;
        passes += 1;
    }

    if reached == target {
        Ok(passes)
    } else {
        Err(unsupported())
    }
}

impl ScalePlan {
    pub fn new(base: u32, target: u32) -> Result<Self> {
        Ok(Self {
            base,
            target,
            passes: plan_passes(base, target)?,
        })
    }

    /// Input/output directory of each pass, in order.
    ///
    /// Pass 1 reads `frames_dir`; pass n reads pass n-1's output.
    pub fn pass_dirs(&self, frames_dir: &Path, upscaled_dir: &Path) -> Vec<(PathBuf, PathBuf)> {
        let mut dirs = Vec::with_capacity(self.passes as usize);
        let mut input = frames_dir.to_path_buf();
        for pass in 1..=self.passes {
            let output = upscaled_dir.join(format!("pass_{}", pass));
            dirs.push((input, output.clone()));
            input = output;
        }
        dirs
    }
}
