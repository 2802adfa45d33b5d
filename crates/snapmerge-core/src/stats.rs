use serde::{Deserialize, Serialize};

/// Summary counters for one reconciliation run, persisted inside the
/// mapping artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingStats {
    pub total_messages: usize,
    pub messages_with_media: usize,
    pub pipe_separated: usize,
    /// Individual ID occurrences across messages (not deduplicated).
    pub total_media_ids: usize,
    pub unique_ids: usize,
    pub ids_mapped: usize,
    pub ids_unmapped: usize,
    pub total_media_files: usize,
    pub duplicate_ids: usize,
    pub orphaned_files: usize,
    pub videos_processed: usize,
    pub videos_matched: usize,
    /// Percentage of referenced IDs that resolved to a file.
    pub mapping_rate: f64,
}

impl MappingStats {
    pub fn compute_mapping_rate(&mut self) {
        self.mapping_rate = if self.unique_ids > 0 {
            self.ids_mapped as f64 * 100.0 / self.unique_ids as f64
        } else {
            0.0
        };
    }
}
