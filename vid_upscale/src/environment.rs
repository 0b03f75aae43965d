//! Real-ESRGAN checkout: virtualenv interpreter, inference script, weights.

use crate::models::ModelSpec;
use shared_utils::logging::execute_external_command;
use shared_utils::{Result, UpscaleError};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const INFERENCE_SCRIPT: &str = "inference_realesrgan.py";

const CUDA_PROBE: &str = "import torch; print(torch.cuda.is_available())";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealEsrganEnv {
    pub root: PathBuf,
    pub python: PathBuf,
    pub script: PathBuf,
    pub weights_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CudaStatus {
    Available,
    Unavailable,
    Unknown(String),
}

impl CudaStatus {
    /// Reads the `print(torch.cuda.is_available())` output.
    pub fn from_probe_output(stdout: &str) -> Self {
        match stdout.trim().lines().last().map(str::trim) {
            Some("True") => CudaStatus::Available,
            Some("False") => CudaStatus::Unavailable,
            other => CudaStatus::Unknown(format!(
                "unexpected output: {:?}",
                other.unwrap_or_default()
            )),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, CudaStatus::Available)
    }
}

impl fmt::Display for CudaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CudaStatus::Available => f.write_str("available"),
            CudaStatus::Unavailable => f.write_str("unavailable (CPU inference, slow)"),
            CudaStatus::Unknown(reason) => write!(f, "unknown ({})", reason),
        }
    }
}

/// Interpreter location inside a venv for the current platform.
pub fn venv_python(root: &Path) -> PathBuf {
    if cfg!(windows) {
        root.join(".venv").join("Scripts").join("python.exe")
    } else {
        root.join(".venv").join("bin").join("python")
    }
}

impl RealEsrganEnv {
    pub fn locate(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            python: venv_python(&root),
            script: root.join(INFERENCE_SCRIPT),
            weights_dir: root.join("weights"),
            root,
        }
    }

    pub fn weights_path(&self, model: &ModelSpec) -> PathBuf {
        self.weights_dir.join(model.weights_file())
    }

    /// Checks venv, script and weights, in that order.
    pub fn verify(&self, model: &ModelSpec) -> Result<()> {
        if !self.python.is_file() {
            return Err(UpscaleError::EnvironmentMissing {
                what: "Real-ESRGAN venv interpreter".to_string(),
                path: self.python.clone(),
            });
        }
        if !self.script.is_file() {
            return Err(UpscaleError::EnvironmentMissing {
                what: INFERENCE_SCRIPT.to_string(),
                path: self.script.clone(),
            });
        }
        let weights = self.weights_path(model);
        if !weights.is_file() {
            return Err(UpscaleError::ModelNotFound(weights));
        }
        info!(root = %self.root.display(), model = model.name, "Real-ESRGAN environment ready");
        Ok(())
    }

    /// Asks the venv's torch whether CUDA is usable. Never fails the job.
    pub fn probe_cuda(&self) -> CudaStatus {
        let python = self.python.to_string_lossy();
        let status = match execute_external_command(&python, &["-c", CUDA_PROBE]) {
            Ok(result) if result.success() => CudaStatus::from_probe_output(&result.stdout),
            Ok(result) => CudaStatus::Unknown(shared_utils::format_ffmpeg_error(&result.stderr)),
            Err(e) => CudaStatus::Unknown(e.to_string()),
        };
        if !status.is_available() {
            warn!(status = %status, "CUDA not available to Real-ESRGAN");
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::find_model;
    use std::fs;
    use tempfile::TempDir;

    fn fake_env(with_script: bool, with_weights: bool) -> (TempDir, RealEsrganEnv) {
        let temp = TempDir::new().unwrap();
        let env = RealEsrganEnv::locate(temp.path().join("Real-ESRGAN"));
        fs::create_dir_all(env.python.parent().unwrap()).unwrap();
        fs::write(&env.python, "").unwrap();
        if with_script {
            fs::write(&env.script, "").unwrap();
        }
        if with_weights {
            fs::create_dir_all(&env.weights_dir).unwrap();
            fs::write(env.weights_dir.join("realesr-animevideov3.pth"), "").unwrap();
        }
        (temp, env)
    }

    #[test]
    fn test_locate_layout() {
        let env = RealEsrganEnv::locate("Real-ESRGAN");
        assert_eq!(env.script, PathBuf::from("Real-ESRGAN/inference_realesrgan.py"));
        assert_eq!(env.weights_dir, PathBuf::from("Real-ESRGAN/weights"));
        assert!(env.python.starts_with("Real-ESRGAN/.venv"));
    }

    #[test]
    fn test_verify_missing_venv() {
        let temp = TempDir::new().unwrap();
        let env = RealEsrganEnv::locate(temp.path());
        let model = find_model("realesr-animevideov3").unwrap();
        assert!(matches!(
            env.verify(model),
            Err(UpscaleError::EnvironmentMissing { .. })
        ));
    }

    #[test]
    fn test_verify_missing_script() {
        let (_temp, env) = fake_env(false, true);
        let model = find_model("realesr-animevideov3").unwrap();
        match env.verify(model) {
            Err(UpscaleError::EnvironmentMissing { what, .. }) => {
                assert_eq!(what, INFERENCE_SCRIPT)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_verify_missing_weights() {
        let (_temp, env) = fake_env(true, false);
        let model = find_model("realesr-animevideov3").unwrap();
        assert!(matches!(env.verify(model), Err(UpscaleError::ModelNotFound(_))));
    }

    #[test]
    fn test_verify_complete() {
        let (_temp, env) = fake_env(true, true);
        assert!(env.verify(find_model("realesr-animevideov3").unwrap()).is_ok());
        assert!(env.verify(find_model("RealESRGAN_x4plus").unwrap()).is_err());
    }

    #[test]
    fn test_cuda_status_parsing() {
        assert_eq!(CudaStatus::from_probe_output("True\n"), CudaStatus::Available);
        assert_eq!(CudaStatus::from_probe_output("False"), CudaStatus::Unavailable);
        assert_eq!(
            CudaStatus::from_probe_output("some warning\nTrue\n"),
            CudaStatus::Available
        );
        assert!(matches!(CudaStatus::from_probe_output(""), CudaStatus::Unknown(_)));
    }

    #[test]
    fn test_cuda_check_without_interpreter() {
        let temp = TempDir::new().unwrap();
        let env = RealEsrganEnv::locate(temp.path());
        assert!(matches!(env.probe_cuda(), CudaStatus::Unknown(_)));
    }
}
