//! Safety Module
//!
//! Work directories get their contents deleted between runs; these checks
//! stop a misconfigured work dir from pointing that at a system directory.

use std::path::Path;

const DANGEROUS_DIRS: &[&str] = &[
    "/",
    "/System",
    "/usr",
    "/bin",
    "/sbin",
    "/etc",
    "/var",
    "/private",
    "/Library",
    "/Applications",
    "/Users",
    "/home",
    "/root",
    "/boot",
    "/dev",
    "/proc",
    "/sys",
    "/tmp",
    "/opt",
    "C:\\",
    "C:\\Windows",
    "C:\\Users",
];

pub fn check_dangerous_directory(path: &Path) -> Result<(), String> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

    for candidate in [path, canonical.as_path()] {
        let path_str = candidate.to_string_lossy();
        let trimmed = if path_str.len() > 1 {
            path_str.trim_end_matches(['/', '\\'])
        } else {
            &path_str
        };
        if let Some(dangerous) = DANGEROUS_DIRS.iter().find(|d| trimmed == **d) {
            return Err(format!(
                "'{}' is a protected system directory",
                dangerous
            ));
        }
    }

    let components = canonical.components().count();
    let path_str = canonical.to_string_lossy();
    if components <= 3 && (path_str.starts_with("/Users/") || path_str.starts_with("/home/")) {
        return Err(format!(
            "'{}' is a home directory root",
            path.display()
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_dirs_blocked() {
        assert!(check_dangerous_directory(Path::new("/")).is_err());
        assert!(check_dangerous_directory(Path::new("/usr")).is_err());
        assert!(check_dangerous_directory(Path::new("/etc/")).is_err());
    }

    #[test]
    fn test_home_root_blocked() {
        assert!(check_dangerous_directory(Path::new("/home/alice")).is_err());
    }

    #[test]
    fn test_project_dir_allowed() {
        let temp = tempfile::TempDir::new().unwrap();
        let work = temp.path().join("frames");
        std::fs::create_dir_all(&work).unwrap();
        assert!(check_dangerous_directory(&work).is_ok());
    }
}
