use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::rasterize::pdftoppm_version;
use crate::store::{STORE_FILE_NAME, VectorStore};

pub fn run(args: StatusArgs) -> Result<()> {
    let store_path = args.persist_dir.join(STORE_FILE_NAME);
    let manifest_dir = args.persist_dir.join("manifests");

    info!(persist_dir = %args.persist_dir.display(), "status requested");

    match pdftoppm_version() {
        Some(version) => info!(version = %version, "pdftoppm available"),
        None => warn!("pdftoppm not found on PATH; indexing and fetch will fail"),
    }

    if store_path.exists() {
        let store = VectorStore::open(Some(args.persist_dir.as_path()))
            .with_context(|| format!("failed to open {}", store_path.display()))?;
        let collections = store.list()?;
        info!(
            path = %store.location().unwrap_or(store_path.as_path()).display(),
            collections = collections.len(),
            "vector store status"
        );
        for collection in collections {
            info!(
                name = %collection.name,
                entries = collection.entry_count,
                pages = collection.page_count.unwrap_or_default(),
                dimension = collection.dimension.unwrap_or_default(),
                document = %collection.source_path.unwrap_or_default(),
                label = %collection.label.unwrap_or_default(),
                updated_at = %collection.updated_at,
                "collection"
            );
        }
    } else {
        warn!(path = %store_path.display(), "vector store missing");
    }

    let manifests = index_manifests(&manifest_dir)?;
    match manifests.last() {
        Some(latest) => info!(
            count = manifests.len(),
            latest = %latest.display(),
            "index run manifests"
        ),
        None => warn!(path = %manifest_dir.display(), "no index run manifests"),
    }

    Ok(())
}

/// `index_run_*.json` files, oldest first (names embed a sortable timestamp).
fn index_manifests(manifest_dir: &Path) -> Result<Vec<PathBuf>> {
    if !manifest_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut manifests = Vec::new();
    let entries = fs::read_dir(manifest_dir)
        .with_context(|| format!("failed to read {}", manifest_dir.display()))?;
    for entry in entries {
        let entry = entry
            .with_context(|| format!("failed to read entry in {}", manifest_dir.display()))?;
        let path = entry.path();
        let is_manifest = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with("index_run_") && name.ends_with(".json"))
            .unwrap_or(false);
        if is_manifest {
            manifests.push(path);
        }
    }
    manifests.sort();
    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifests_are_listed_oldest_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in [
            "index_run_20260102T000000Z.json",
            "index_run_20260101T000000Z.json",
            "notes.json",
        ] {
            fs::write(dir.path().join(name), b"{}").expect("write");
        }

        let manifests = index_manifests(dir.path()).expect("list");
        let names = manifests
            .iter()
            .filter_map(|path| path.file_name().and_then(|name| name.to_str()))
            .collect::<Vec<&str>>();
        assert_eq!(
            names,
            vec![
                "index_run_20260101T000000Z.json",
                "index_run_20260102T000000Z.json"
            ]
        );
        assert!(index_manifests(&dir.path().join("missing")).expect("missing").is_empty());
    }
}
