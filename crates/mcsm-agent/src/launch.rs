use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::error::Precondition;

/// File whose presence means the user accepted the server's EULA.
pub const ACCEPTANCE_MARKER: &str = "eula.txt";

/// How to find the runnable artifact inside an instance directory.
#[derive(Debug, Clone)]
pub struct ArtifactRule {
    pub expected_name: String,
    /// Case-insensitive name prefix preferred when the expected file is missing.
    pub prefix: String,
    /// Extension every candidate must carry. Empty accepts any file.
    pub extension: String,
}

/// Runtime plus arguments around the artifact: `<runtime> <runtime_args..> <artifact> <artifact_args..>`.
#[derive(Debug, Clone)]
pub struct LaunchProfile {
    pub runtime: String,
    pub runtime_args: Vec<String>,
    pub artifact_args: Vec<String>,
    pub artifact: ArtifactRule,
}

#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub exec: PathBuf,
    pub args: Vec<String>,
    pub artifact: PathBuf,
}

fn non_empty_file(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() > 0)
}

fn has_extension(path: &Path, ext: &str) -> bool {
    if ext.is_empty() {
        return true;
    }
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

fn candidates(dir: &Path, rule: &ArtifactRule) -> Vec<PathBuf> {
    let rd = match fs::read_dir(dir) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };
    let mut out: Vec<PathBuf> = rd
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && has_extension(p, &rule.extension))
        .collect();
    out.sort();
    out
}

fn absolute(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}

/// Picks the artifact: exact name, then a prefixed candidate, then any candidate.
/// Empty files never qualify.
pub fn locate_artifact(dir: &Path, rule: &ArtifactRule) -> Option<PathBuf> {
    if !rule.expected_name.is_empty() {
        let preferred = dir.join(&rule.expected_name);
        if non_empty_file(&preferred) {
            return Some(absolute(preferred));
        }
    }

    let all = candidates(dir, rule);
    let prefix = rule.prefix.to_ascii_lowercase();
    if !prefix.is_empty()
        && let Some(p) = all.iter().find(|p| {
            p.file_name()
                .and_then(|s| s.to_str())
                .is_some_and(|n| n.to_ascii_lowercase().starts_with(&prefix))
                && non_empty_file(p)
        })
    {
        return Some(absolute(p.clone()));
    }

    all.into_iter().find(|p| non_empty_file(p)).map(absolute)
}

fn is_executable_file(path: &Path) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        return meta.permissions().mode() & 0o111 != 0;
    }

    #[cfg(not(unix))]
    {
        true
    }
}

/// Resolves a program the way a shell would: paths are checked directly,
/// bare names are searched on `PATH`.
pub fn resolve_runtime(bin: &str) -> Option<PathBuf> {
    let path = Path::new(bin);
    if path.components().count() > 1 {
        return is_executable_file(path).then(|| path.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths).find_map(|dir| {
        let candidate = dir.join(bin);
        if is_executable_file(&candidate) {
            return Some(candidate);
        }
        #[cfg(windows)]
        {
            let exe = dir.join(format!("{bin}.exe"));
            if is_executable_file(&exe) {
                return Some(exe);
            }
        }
        None
    })
}

impl LaunchProfile {
    /// Checks the start preconditions in order and builds the command line.
    /// The first failing check wins.
    pub fn resolve(&self, instance_dir: &Path) -> Result<LaunchSpec, Precondition> {
        if !instance_dir.join(ACCEPTANCE_MARKER).exists() {
            return Err(Precondition::AcceptanceNotGranted);
        }
        let artifact =
            locate_artifact(instance_dir, &self.artifact).ok_or(Precondition::NoRunnableArtifact)?;
        let exec = resolve_runtime(&self.runtime).ok_or(Precondition::RuntimeNotInstalled)?;

        let mut args = self.runtime_args.clone();
        args.push(artifact.to_string_lossy().to_string());
        args.extend(self.artifact_args.iter().cloned());

        Ok(LaunchSpec {
            exec,
            args,
            artifact,
        })
    }
}
