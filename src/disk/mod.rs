//! Disk images: chunk addressing and file classification

mod chunks;

pub use chunks::{chunk_url, next_chunk_url, parse_chunk_url, ChunkedFileSpec, MAX_CHUNK_SIZE};

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

/// Extensions recognised as disk images. Matching is case-sensitive.
pub const DISK_IMAGE_EXTENSIONS: [&str; 4] = [".iso", ".dsk", ".img", ".toast"];

/// Whether `name` looks like a disk image rather than a plain file
pub fn is_disk_image_file(name: &str) -> bool {
    DISK_IMAGE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Load a JSON list of chunked file specs and validate each one.
pub fn load_manifest(path: &Path) -> Result<Vec<ChunkedFileSpec>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read disk manifest: {:?}", path))?;
    let specs: Vec<ChunkedFileSpec> = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse disk manifest: {:?}", path))?;

    for spec in &specs {
        spec.validate()
            .with_context(|| format!("Invalid disk spec in {:?}", path))?;
        if !is_disk_image_file(&spec.name) {
            warn!("Disk spec {} does not have a disk image extension", spec.name);
        }
    }

    info!("Loaded {} disk specs from {:?}", specs.len(), path);
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_disk_image_file() {
        assert!(is_disk_image_file("game.iso"));
        assert!(is_disk_image_file("backup.toast"));
        assert!(is_disk_image_file("System.dsk"));
        assert!(is_disk_image_file("hd.img"));
        assert!(!is_disk_image_file("Disk.DSK"));
        assert!(!is_disk_image_file("readme.txt"));
        assert!(!is_disk_image_file("iso"));
    }

    #[test]
    fn test_load_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disks.json");
        let spec = ChunkedFileSpec::from_bytes("a.dsk", "/Disk/a", &[1, 2, 3, 4, 5], 2).unwrap();
        std::fs::write(&path, serde_json::to_string(&vec![spec.clone()]).unwrap()).unwrap();

        let loaded = load_manifest(&path).unwrap();
        assert_eq!(loaded, vec![spec]);
    }

    #[test]
    fn test_load_manifest_rejects_inconsistent_spec() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disks.json");
        std::fs::write(
            &path,
            r#"[{"name":"a.dsk","baseUrl":"/d","totalSize":10,"chunks":["aa"],"chunkSize":4}]"#,
        )
        .unwrap();
        assert!(load_manifest(&path).is_err());
    }
}
