pub mod collect;
pub mod conversations;
pub mod file_index;
pub mod media_id;
pub mod mp4;
pub mod reconcile;
pub mod stats;
pub mod timestamp_index;

use std::path::PathBuf;
use std::time::Instant;

use log::info;
use serde::{Deserialize, Serialize};

pub use media_id::MediaId;
pub use reconcile::MappingReport;
pub use stats::MappingStats;

/// Filename of the mapping artifact written into the output directory.
pub const MAPPING_FILENAME: &str = "mapping.json";

fn default_threshold() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileOptions {
    /// Directory of per-conversation folders, each holding conversation.json.
    pub conversations_dir: PathBuf,
    /// Same layout for group chats.
    pub groups_dir: PathBuf,
    /// Flat directory of exported media files.
    pub media_dir: PathBuf,
    /// Output directory for the mapping artifact.
    pub output: PathBuf,
    /// Maximum file-to-message distance for a timestamp match, in seconds.
    #[serde(default = "default_threshold")]
    pub threshold_secs: u32,
    /// Parallelize directory scanning and per-file matching on large inputs.
    #[serde(default = "default_true")]
    pub parallel: bool,
    /// Fall back to ffprobe when the binary container parse fails.
    #[serde(default = "default_true")]
    pub probe_fallback: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            conversations_dir: PathBuf::new(),
            groups_dir: PathBuf::new(),
            media_dir: PathBuf::new(),
            output: PathBuf::new(),
            threshold_secs: default_threshold(),
            parallel: true,
            probe_fallback: true,
        }
    }
}

/// Type alias for progress callback
pub type ProgressCallback = dyn Fn(&str, u64, u64, &str) + Send + Sync;

/// Throttled progress reporter — emits at most every 200ms or on completion.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback,
    last_emit: std::sync::Mutex<Instant>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback) -> Self {
        Self {
            inner,
            last_emit: std::sync::Mutex::new(Instant::now() - std::time::Duration::from_secs(1)),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let is_done = current + 1 >= total;
        if !is_done {
            let mut last = self.last_emit.lock().unwrap();
            if last.elapsed().as_millis() < 200 {
                return;
            }
            *last = Instant::now();
        }
        (self.inner)(stage, current, total, message);
    }
}

/// Run the full reconciliation pipeline: load conversations, classify every
/// media file, annotate the message records, and persist both the updated
/// conversations and the mapping artifact.
pub fn run(
    options: &ReconcileOptions,
    progress_callback: &ProgressCallback,
) -> anyhow::Result<MappingStats> {
    let tp = ThrottledProgress::new(progress_callback);

    let mut conversations =
        conversations::load_conversations(&options.conversations_dir, &options.groups_dir)?;
    if conversations.is_empty() {
        info!("No conversations found, nothing to reconcile");
        return Ok(MappingStats::default());
    }

    let report = reconcile::reconcile_media(&conversations, &options.media_dir, options, &tp)?;

    reconcile::annotate_matches(&mut conversations, &report);
    conversations::save_conversations(
        &conversations,
        &options.conversations_dir,
        &options.groups_dir,
    )?;

    report.save(&options.output.join(MAPPING_FILENAME))?;
    info!(
        "Saved mapping data to {}",
        options.output.join(MAPPING_FILENAME).display()
    );

    Ok(report.statistics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_pipeline_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let conversations_dir = dir.path().join("conversations");
        let groups_dir = dir.path().join("groups");
        let media_dir = dir.path().join("media");
        let output = dir.path().join("out");

        let folder = conversations_dir.join("alice");
        fs::create_dir_all(&folder).unwrap();
        fs::write(
            folder.join("conversation.json"),
            r#"{
                "conversation_metadata": {"conversation_id": "alice"},
                "messages": [{"Media IDs": "media~AAAA-1111", "Created(microseconds)": 1748736000000}]
            }"#,
        )
        .unwrap();

        fs::create_dir_all(&media_dir).unwrap();
        fs::write(media_dir.join("2025-06-01_media~AAAA-1111.jpg"), b"jpg").unwrap();

        let options = ReconcileOptions {
            conversations_dir: conversations_dir.clone(),
            groups_dir,
            media_dir,
            output: output.clone(),
            probe_fallback: false,
            ..Default::default()
        };

        let stats = run(&options, &|_, _, _, _| {}).unwrap();
        assert_eq!(stats.ids_mapped, 1);
        assert_eq!(stats.mapping_rate, 100.0);

        // Mapping artifact written and loadable
        let report = MappingReport::load(&output.join(MAPPING_FILENAME)).unwrap();
        assert_eq!(report.matched_ids, vec!["media~AAAA-1111"]);

        // Message annotated in place
        let updated: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(conversations_dir.join("alice/conversation.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(
            updated["messages"][0]["matched_media_files"][0],
            "2025-06-01_media~AAAA-1111.jpg"
        );
    }
}
