use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::collect::{collect_media_ids, split_media_ids};
use crate::conversations::Conversations;
use crate::file_index::{build_media_index, list_regular_files};
use crate::media_id::MediaId;
use crate::stats::MappingStats;
use crate::timestamp_index::{match_video_timestamps, TimestampMatch};
use crate::{ReconcileOptions, ThrottledProgress};

/// The mapping artifact consumed by the organization phase: the full
/// file index, the ID set partition, and the per-file timestamp matches.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MappingReport {
    /// Media ID token -> filename.
    pub media_index: BTreeMap<String, String>,
    /// IDs referenced by messages and present among the files.
    pub matched_ids: Vec<String>,
    /// IDs referenced by messages but missing from the files.
    pub unmatched_ids: Vec<String>,
    /// Files whose ID no message references.
    pub orphaned_files: Vec<String>,
    /// Filename -> timestamp match for videos without a usable ID.
    pub video_matches: BTreeMap<String, TimestampMatch>,
    pub statistics: MappingStats,
}

impl MappingReport {
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<MappingReport> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

/// Classify every media file as ID-matched, timestamp-matched, or orphaned.
///
/// Matching is a pure query over the conversation snapshot; annotation of
/// the message records happens afterwards in [`annotate_matches`].
pub fn reconcile_media(
    conversations: &Conversations,
    media_dir: &Path,
    options: &ReconcileOptions,
    progress: &ThrottledProgress,
) -> anyhow::Result<MappingReport> {
    // IDs referenced by messages
    let (all_ids, id_stats) = collect_media_ids(conversations);

    // IDs present among the files
    let index = build_media_index(media_dir, options.parallel);
    let index_keys: HashSet<String> = index.map.keys().map(|id| id.to_string()).collect();

    let mut matched_ids: Vec<String> = all_ids.intersection(&index_keys).cloned().collect();
    let mut unmatched_ids: Vec<String> = all_ids.difference(&index_keys).cloned().collect();
    let mut orphaned_files: Vec<String> = index_keys.difference(&all_ids).cloned().collect();
    matched_ids.sort();
    unmatched_ids.sort();
    orphaned_files.sort();

    info!(
        "Matched {}/{} media IDs, {} unmatched, {} orphaned files",
        matched_ids.len(),
        all_ids.len(),
        unmatched_ids.len(),
        orphaned_files.len()
    );

    // Videos not already resolved by ID are candidates for timestamp matching
    let matched_set: HashSet<&str> = matched_ids.iter().map(String::as_str).collect();
    let candidates: Vec<_> = list_regular_files(media_dir)
        .into_iter()
        .filter(|name| {
            mime_guess::from_path(name)
                .first()
                .map_or(false, |m| m.type_() == mime_guess::mime::VIDEO)
        })
        .filter(|name| match MediaId::from_filename(name) {
            Some(id) => !matched_set.contains(id.as_str()),
            None => true,
        })
        .map(|name| media_dir.join(name))
        .collect();

    info!(
        "Found {} video files without matched media IDs",
        candidates.len()
    );

    let video_matches = match_video_timestamps(
        &candidates,
        conversations,
        options.threshold_secs,
        options.parallel,
        options.probe_fallback,
        progress,
    );

    let mut statistics = MappingStats {
        total_messages: id_stats.total_messages,
        messages_with_media: id_stats.messages_with_media,
        pipe_separated: id_stats.pipe_separated,
        total_media_ids: id_stats.total_ids,
        unique_ids: all_ids.len(),
        ids_mapped: matched_ids.len(),
        ids_unmapped: unmatched_ids.len(),
        total_media_files: index.total_files,
        duplicate_ids: index.duplicate_ids,
        orphaned_files: orphaned_files.len(),
        videos_processed: candidates.len(),
        videos_matched: video_matches.len(),
        ..Default::default()
    };
    statistics.compute_mapping_rate();

    Ok(MappingReport {
        media_index: index
            .map
            .into_iter()
            .map(|(id, name)| (id.to_string(), name))
            .collect(),
        matched_ids,
        unmatched_ids,
        orphaned_files,
        video_matches: video_matches.into_iter().collect(),
        statistics,
    })
}

/// Write match results back onto the message records: filenames for every
/// ID the message references that resolved to a file, then the
/// timestamp-match assignments with their signed differences.
pub fn annotate_matches(conversations: &mut Conversations, report: &MappingReport) -> usize {
    let mut annotated = 0;

    for messages in conversations.values_mut() {
        for message in messages.iter_mut() {
            if message.media_ids.is_empty() {
                continue;
            }
            let files: Vec<String> = split_media_ids(&message.media_ids)
                .into_iter()
                .filter_map(|id| report.media_index.get(id).cloned())
                .filter(|f| !message.matched_media_files.contains(f))
                .collect();
            if !files.is_empty() {
                message.matched_media_files.extend(files);
                annotated += 1;
            }
        }
    }

    for (filename, m) in &report.video_matches {
        let Some(messages) = conversations.get_mut(&m.conv_id) else {
            continue;
        };
        let Some(message) = messages.get_mut(m.msg_idx) else {
            continue;
        };
        if !message.matched_media_files.contains(filename) {
            message.matched_media_files.push(filename.clone());
        }
        message.time_diff_ms = Some(m.diff_ms);
        annotated += 1;
    }

    info!("Annotated {annotated} messages with matched media");
    annotated
}
