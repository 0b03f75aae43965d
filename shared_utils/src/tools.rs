//! External tool discovery

use crate::errors::{Result, UpscaleError};
use std::path::PathBuf;

/// Resolves a tool name or path, failing with an install hint.
pub fn ensure_tool(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| {
        UpscaleError::ToolNotFound(format!(
            "{} (install ffmpeg and make sure it is on PATH)",
            name
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_tool() {
        let err = ensure_tool("definitely-not-a-real-tool-42").unwrap_err();
        assert!(err.to_string().contains("definitely-not-a-real-tool-42"));
        assert!(matches!(err, UpscaleError::ToolNotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_present_tool() {
        assert!(ensure_tool("sh").unwrap().is_absolute());
    }
}
