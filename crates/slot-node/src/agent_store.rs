//! Persisted agent id, so a restart reuses the id the relay handed out.

use std::path::Path;

/// Read the stored agent id. A missing or empty file means "not registered".
pub fn load(path: &Path) -> anyhow::Result<Option<i64>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(anyhow::anyhow!("reading {}: {e}", path.display())),
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let id = trimmed
        .parse::<i64>()
        .map_err(|e| anyhow::anyhow!("parsing agent id in {}: {e}", path.display()))?;
    Ok(Some(id))
}

pub fn save(path: &Path, agent_id: i64) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| anyhow::anyhow!("creating {}: {e}", parent.display()))?;
    }
    std::fs::write(path, agent_id.to_string())
        .map_err(|e| anyhow::anyhow!("writing {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load(&dir.path().join("agent_id.txt")).unwrap(), None);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("agent_id.txt");
        save(&path, 42).unwrap();
        assert_eq!(load(&path).unwrap(), Some(42));
    }

    #[test]
    fn tolerates_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_id.txt");
        std::fs::write(&path, "17\n").unwrap();
        assert_eq!(load(&path).unwrap(), Some(17));
    }

    #[test]
    fn garbage_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_id.txt");
        std::fs::write(&path, "not-a-number").unwrap();
        assert!(load(&path).is_err());
    }
}
