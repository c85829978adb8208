//! Where DaVinci Resolve keeps title templates when no path is given.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

/// Sub-directories of a Resolve root that usually hold `.drfx` bundles
const TEMPLATE_SUBDIRS: &[&str] = &["Fusion", "Fusion/Templates", "Support", "Support/Resolve"];

/// Per-OS Resolve install and user directories, existing or not
pub fn resolve_template_roots() -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = Vec::new();

    #[cfg(target_os = "macos")]
    {
        roots.push(PathBuf::from("/Library/Application Support/Blackmagic Design/DaVinci Resolve"));
        if let Some(home) = dirs::home_dir() {
            roots.push(home.join("Library/Application Support/Blackmagic Design/DaVinci Resolve"));
            roots.push(home.join("Movies/DaVinci Resolve"));
            roots.push(home.join("Movies/DaVinci Resolve/DRX"));
        }
    }

    #[cfg(target_os = "windows")]
    {
        roots.push(PathBuf::from("C:\\ProgramData\\Blackmagic Design\\DaVinci Resolve"));
        if let Some(roaming) = dirs::config_dir() {
            roots.push(roaming.join("Blackmagic Design\\DaVinci Resolve"));
        }
        if let Some(documents) = dirs::document_dir() {
            roots.push(documents.join("DaVinci Resolve"));
            roots.push(documents.join("DaVinci Resolve\\DRX"));
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Some(home) = dirs::home_dir() {
            roots.push(home.join(".local/share/DaVinciResolve"));
        }
        roots.push(PathBuf::from("/opt/resolve"));
        if let Some(home) = dirs::home_dir() {
            roots.push(home.join("Documents/DaVinci Resolve"));
            roots.push(home.join("DaVinci Resolve"));
        }
    }

    roots
}

/// Keep the candidates that exist, add their template sub-directories,
/// and list directories holding `.drfx` files first.
pub fn existing_template_roots(candidates: &[PathBuf]) -> Vec<PathBuf> {
    let mut existing: Vec<PathBuf> = candidates.iter().filter(|p| p.is_dir()).cloned().collect();

    let expanded: Vec<PathBuf> = existing
        .iter()
        .flat_map(|base| TEMPLATE_SUBDIRS.iter().map(move |sub| base.join(sub)))
        .filter(|p| p.is_dir())
        .collect();
    for path in expanded {
        if !existing.contains(&path) {
            existing.push(path);
        }
    }

    let (mut with_containers, others): (Vec<PathBuf>, Vec<PathBuf>) =
        existing.into_iter().partition(|p| holds_container(p));
    with_containers.extend(others);
    debug!("default template roots: {:?}", with_containers);
    with_containers
}

/// Existing Resolve template roots on this machine
pub fn default_project_roots() -> Vec<PathBuf> {
    existing_template_roots(&resolve_template_roots())
}

fn holds_container(dir: &Path) -> bool {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .any(|e| {
            e.file_type().is_file()
                && e.path()
                    .extension()
                    .map_or(false, |ext| ext.eq_ignore_ascii_case("drfx"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn missing_roots_are_dropped_and_template_dirs_added() {
        let dir = TempDir::new().unwrap();
        let resolve = dir.path().join("Resolve");
        let templates = resolve.join("Fusion/Templates");
        fs::create_dir_all(&templates).unwrap();
        let missing = dir.path().join("nowhere");

        let roots = existing_template_roots(&[missing, resolve.clone()]);
        assert_eq!(roots, vec![resolve.clone(), resolve.join("Fusion"), templates]);
    }

    #[test]
    fn roots_with_containers_come_first() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("Empty");
        let full = dir.path().join("Full");
        fs::create_dir_all(&empty).unwrap();
        fs::create_dir_all(full.join("Titles")).unwrap();
        fs::write(full.join("Titles").join("Lower Third.DRFX"), b"").unwrap();

        let roots = existing_template_roots(&[empty.clone(), full.clone()]);
        assert_eq!(roots, vec![full, empty]);
    }
}
