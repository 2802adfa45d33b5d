use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;

use log::{info, warn};
use rayon::prelude::*;

use crate::media_id::MediaId;

/// Directories above this size get their filenames parsed on the rayon pool.
const PARALLEL_SCAN_THRESHOLD: usize = 1000;

/// Result of one media-directory scan.
#[derive(Debug, Default)]
pub struct MediaIndex {
    /// Media ID -> filename, one entry per parseable filename.
    pub map: HashMap<MediaId, String>,
    /// Regular, non-hidden files seen (including ones without an ID).
    pub total_files: usize,
    /// Filenames that collided with an earlier entry's ID (last one wins).
    pub duplicate_ids: usize,
}

/// Scan a flat media directory and index every filename that carries a media
/// ID. Files without an ID stay out of the map but count toward
/// `total_files`. A missing directory yields an empty index with a warning.
///
/// Above [`PARALLEL_SCAN_THRESHOLD`] files the parse runs on the rayon pool;
/// results are merged in directory-listing order, so the map content matches
/// the sequential path exactly, duplicate tiebreak included.
pub fn build_media_index(media_dir: &Path, parallel: bool) -> MediaIndex {
    if !media_dir.exists() {
        warn!("Media directory does not exist: {}", media_dir.display());
        return MediaIndex::default();
    }

    let filenames = list_regular_files(media_dir);
    let total_files = filenames.len();
    info!("Found {total_files} files in {}", media_dir.display());

    let parsed: Vec<(MediaId, String)> = if parallel && filenames.len() > PARALLEL_SCAN_THRESHOLD {
        filenames
            .into_par_iter()
            .filter_map(|name| MediaId::from_filename(&name).map(|id| (id, name)))
            .collect()
    } else {
        filenames
            .into_iter()
            .filter_map(|name| MediaId::from_filename(&name).map(|id| (id, name)))
            .collect()
    };

    let mut index = MediaIndex {
        total_files,
        ..MediaIndex::default()
    };
    for (id, name) in parsed {
        match index.map.entry(id) {
            Entry::Occupied(mut e) => {
                // Two files claiming one ID points at duplicated export data
                let previous = e.insert(name);
                warn!(
                    "Duplicate media ID {}: {previous} replaced by {}",
                    e.key(),
                    e.get()
                );
                index.duplicate_ids += 1;
            }
            Entry::Vacant(e) => {
                e.insert(name);
            }
        }
    }

    info!("Mapped {} media IDs from filenames", index.map.len());
    index
}

/// Names of regular, non-hidden files directly inside `dir` (non-recursive),
/// in directory-listing order.
pub fn list_regular_files(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter(|e| e.path().is_file())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| !name.starts_with('.'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) {
        File::create(dir.join(name)).unwrap();
    }

    #[test]
    fn test_missing_dir_yields_empty_index() {
        let index = build_media_index(Path::new("/nonexistent/media"), false);
        assert!(index.map.is_empty());
        assert_eq!(index.total_files, 0);
    }

    #[test]
    fn test_index_contents() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "2025-07-27_media~28E0FFB8-5182-4D9D-92E1-DD941C881FC5.mp4");
        touch(dir.path(), "2025-07-27_b~EiASFU8zdmJFSGUxRDR6.jpeg");
        touch(dir.path(), "2025-07-27_thumbnail~AAAA-1111.jpg");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), ".hidden");

        let index = build_media_index(dir.path(), false);
        assert_eq!(index.map.len(), 2);
        assert_eq!(index.total_files, 4); // hidden file excluded
        assert_eq!(index.duplicate_ids, 0);
        assert_eq!(
            index.map[&MediaId::Media(
                "media~28E0FFB8-5182-4D9D-92E1-DD941C881FC5".to_string()
            )],
            "2025-07-27_media~28E0FFB8-5182-4D9D-92E1-DD941C881FC5.mp4"
        );
    }

    #[test]
    fn test_duplicate_ids_counted() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "2025-07-27_media~AAAA-1111.mp4");
        touch(dir.path(), "2025-07-28_media~AAAA-1111.mp4");

        let index = build_media_index(dir.path(), false);
        assert_eq!(index.map.len(), 1);
        assert_eq!(index.duplicate_ids, 1);
    }

    #[test]
    fn test_parallel_scan_matches_sequential() {
        let dir = tempdir().unwrap();
        // Enough files to cross the rayon threshold, plus one colliding pair
        for i in 0..1100 {
            touch(dir.path(), &format!("2025-07-27_media~{i:04X}-0000.jpg"));
        }
        touch(dir.path(), "2025-07-27_media~FFFF-9999.mp4");
        touch(dir.path(), "2025-07-28_media~FFFF-9999.mp4");

        let sequential = build_media_index(dir.path(), false);
        let parallel = build_media_index(dir.path(), true);

        // Identical content either way, duplicate tiebreak included
        assert_eq!(parallel.map, sequential.map);
        assert_eq!(parallel.total_files, sequential.total_files);
        assert_eq!(parallel.duplicate_ids, 1);
        assert_eq!(sequential.duplicate_ids, 1);
        assert_eq!(parallel.map.len(), 1101);
    }
}
