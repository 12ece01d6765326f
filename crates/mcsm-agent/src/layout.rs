use std::{
    fs,
    path::{Component, Path, PathBuf},
};

use anyhow::Context;
use mcsm_process::InstanceId;

use crate::launch::ACCEPTANCE_MARKER;

const INSTANCE_PREFIX: &str = "server";

pub fn data_root() -> PathBuf {
    let raw = std::env::var("MCSM_DATA_ROOT").unwrap_or_else(|_| "./minecraft_servers".to_string());
    let p = PathBuf::from(raw);
    let abs = if p.is_absolute() {
        p
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(p)
    };

    // Best-effort canonicalization: the directory may not exist yet.
    fs::canonicalize(&abs).unwrap_or(abs)
}

/// Instance directories live one level below the root; ids are plain names.
pub fn validate_id(id: &InstanceId) -> anyhow::Result<()> {
    let s = id.as_str();
    if s.trim().is_empty() {
        anyhow::bail!("instance id must be non-empty");
    }
    let mut comps = Path::new(s).components();
    match (comps.next(), comps.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => anyhow::bail!("invalid instance id: {s:?}"),
    }
}

pub fn instance_dir(root: &Path, id: &InstanceId) -> anyhow::Result<PathBuf> {
    validate_id(id)?;
    Ok(root.join(id.as_str()))
}

pub fn list_instances(root: &Path) -> anyhow::Result<Vec<InstanceId>> {
    let rd = match fs::read_dir(root) {
        Ok(v) => v,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("read {}", root.display())),
    };
    let mut out: Vec<InstanceId> = rd
        .flatten()
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|n| n.starts_with(INSTANCE_PREFIX))
        .map(InstanceId)
        .collect();
    out.sort();
    Ok(out)
}

/// Creates the next free `serverN` directory.
pub fn create_instance(root: &Path) -> anyhow::Result<(InstanceId, PathBuf)> {
    fs::create_dir_all(root).with_context(|| format!("create {}", root.display()))?;
    let existing = list_instances(root)?;
    let mut n = existing.len() + 1;
    loop {
        let id = InstanceId(format!("{INSTANCE_PREFIX}{n}"));
        if !existing.contains(&id) && !root.join(id.as_str()).exists() {
            let dir = root.join(id.as_str());
            fs::create_dir(&dir).with_context(|| format!("create {}", dir.display()))?;
            return Ok((id, dir));
        }
        n += 1;
    }
}

/// Writing the marker is the explicit acceptance action; start only checks for it.
pub fn accept_eula(dir: &Path) -> anyhow::Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("instance directory does not exist: {}", dir.display());
    }
    fs::write(dir.join(ACCEPTANCE_MARKER), b"eula=true\n")
        .with_context(|| format!("write {ACCEPTANCE_MARKER}"))?;
    Ok(())
}
