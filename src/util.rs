//! Small path helpers shared by config loading, tool detection and the
//! process host.

use std::path::{Path, PathBuf};

/// Expand a leading `~` to the current user's home directory.
///
/// Paths without a leading `~` (and `~user` forms) are returned unchanged.
/// If the home directory cannot be determined the input is returned as-is.
#[must_use]
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Resolve the executable to launch for a configured program.
///
/// A bare program name is looked up in `tool_dir` first (the directory the
/// launcher installs its tools into); when no such file exists the bare name
/// is returned and left to `PATH` lookup. Anything with a directory component
/// is only tilde-expanded.
#[must_use]
pub fn resolve_program(program: &str, tool_dir: Option<&Path>) -> PathBuf {
    let path = expand_tilde(Path::new(program));
    if path.components().count() != 1 {
        return path;
    }
    if let Some(dir) = tool_dir {
        let installed = dir.join(format!("{program}{}", std::env::consts::EXE_SUFFIX));
        if installed.is_file() {
            return installed;
        }
    }
    path
}
