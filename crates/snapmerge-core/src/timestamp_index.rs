use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::conversations::Conversations;
use crate::mp4;
use crate::ThrottledProgress;

/// Batches above this size extract and match on the rayon pool.
const PARALLEL_MATCH_THRESHOLD: usize = 10;

/// One message eligible for timestamp matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampEntry {
    pub timestamp_ms: i64,
    pub conv_id: String,
    pub msg_idx: usize,
}

/// A resolved timestamp match. `diff_ms` is file minus message: positive
/// when the file was created after the message, negative when before.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampMatch {
    pub conv_id: String,
    pub msg_idx: usize,
    pub diff_ms: i64,
}

/// Build the sorted timestamp index over every message that is still
/// unclaimed and carries a usable timestamp. Messages already holding
/// matched media are consumed exactly once and never re-enter the pool.
pub fn build_timestamp_index(conversations: &Conversations) -> Vec<TimestampEntry> {
    let mut index = Vec::new();

    for (conv_id, messages) in conversations {
        for (msg_idx, message) in messages.iter().enumerate() {
            if message.is_matched() {
                continue;
            }
            let Some(timestamp_ms) = message.timestamp_ms() else {
                continue;
            };
            index.push(TimestampEntry {
                timestamp_ms,
                conv_id: conv_id.clone(),
                msg_idx,
            });
        }
    }

    index.sort_by_key(|e| e.timestamp_ms);
    info!("Built timestamp index with {} messages", index.len());
    index
}

/// Find the message closest to `target_ms` within `threshold_ms`.
///
/// Binary-searches for the insertion point, then walks outward on both
/// sides. The index is sorted, so each walk stops at the first entry past
/// the threshold.
pub fn find_closest(
    target_ms: i64,
    index: &[TimestampEntry],
    threshold_ms: i64,
) -> Option<TimestampMatch> {
    if index.is_empty() {
        return None;
    }

    // First position whose timestamp is >= target
    let insertion = index.partition_point(|e| e.timestamp_ms < target_ms);

    let mut best: Option<TimestampMatch> = None;
    let mut consider = |entry: &TimestampEntry, diff_ms: i64| {
        if best
            .as_ref()
            .map_or(true, |b| diff_ms.abs() < b.diff_ms.abs())
        {
            best = Some(TimestampMatch {
                conv_id: entry.conv_id.clone(),
                msg_idx: entry.msg_idx,
                diff_ms,
            });
        }
    };

    // Earlier messages: file comes after the message, positive diff
    for entry in index[..insertion].iter().rev() {
        let diff = target_ms - entry.timestamp_ms;
        if diff > threshold_ms {
            break;
        }
        consider(entry, diff);
    }

    // Later messages: file comes before the message, negative diff
    for entry in &index[insertion..] {
        let diff = entry.timestamp_ms - target_ms;
        if diff > threshold_ms {
            break;
        }
        consider(entry, -diff);
    }

    best
}

/// Match a batch of video files against the message corpus by timestamp.
///
/// One index is built for the whole batch; each file is matched against it
/// independently, so two files may legitimately land on the same message
/// within a batch. Files without an extractable timestamp are skipped.
pub fn match_video_timestamps(
    video_files: &[PathBuf],
    conversations: &Conversations,
    threshold_secs: u32,
    parallel: bool,
    probe_fallback: bool,
    progress: &ThrottledProgress,
) -> HashMap<String, TimestampMatch> {
    let index = build_timestamp_index(conversations);
    if index.is_empty() {
        warn!("No messages with timestamps found for matching");
        return HashMap::new();
    }

    let threshold_ms = i64::from(threshold_secs) * 1000;
    let total = video_files.len() as u64;
    let counter = AtomicU64::new(0);

    let match_one = |file: &PathBuf| -> Option<(String, TimestampMatch)> {
        let current = counter.fetch_add(1, Ordering::Relaxed);
        let name = file.file_name()?.to_str()?.to_string();
        progress.report("match", current, total, &name);
        let Some(timestamp_ms) = mp4::extract_mp4_timestamp(file, probe_fallback) else {
            debug!("Could not extract timestamp from {name}");
            return None;
        };
        let found = find_closest(timestamp_ms, &index, threshold_ms)?;
        debug!(
            "Matched {name} to a message with {:.1}s difference",
            found.diff_ms.abs() as f64 / 1000.0
        );
        Some((name, found))
    };

    let matches: HashMap<String, TimestampMatch> =
        if parallel && video_files.len() > PARALLEL_MATCH_THRESHOLD {
            video_files.par_iter().filter_map(match_one).collect()
        } else {
            video_files.iter().filter_map(match_one).collect()
        };

    info!("Matched {} video files by timestamp", matches.len());
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::MessageRecord;

    fn message(ts: i64) -> MessageRecord {
        MessageRecord {
            created_ms: Some(serde_json::json!(ts)),
            ..Default::default()
        }
    }

    fn entry(ts: i64) -> TimestampEntry {
        TimestampEntry {
            timestamp_ms: ts,
            conv_id: "c".to_string(),
            msg_idx: 0,
        }
    }

    #[test]
    fn test_index_is_sorted_and_skips_matched() {
        let mut conversations = Conversations::new();
        let mut claimed = message(500);
        claimed.matched_media_files.push("already.mp4".to_string());
        conversations.insert("a".to_string(), vec![message(3000), message(1000), claimed]);
        conversations.insert("b".to_string(), vec![message(2000), MessageRecord::default()]);

        let index = build_timestamp_index(&conversations);
        assert_eq!(index.len(), 3);
        for pair in index.windows(2) {
            assert!(pair[0].timestamp_ms <= pair[1].timestamp_ms);
        }
        assert!(index.iter().all(|e| e.timestamp_ms != 500));
    }

    #[test]
    fn test_exact_hit_has_zero_diff() {
        let index = vec![entry(1000), entry(5000), entry(9000)];
        let m = find_closest(5000, &index, 1).unwrap();
        assert_eq!(m.diff_ms, 0);
    }

    #[test]
    fn test_closest_wins() {
        let index = vec![entry(1000), entry(5000), entry(9000)];
        let m = find_closest(5800, &index, 10_000).unwrap();
        // 5000 is 800ms earlier; 9000 is 3200ms later
        assert_eq!(m.diff_ms, 800);
    }

    #[test]
    fn test_negative_diff_for_later_message() {
        let index = vec![entry(10_000)];
        let m = find_closest(7000, &index, 5000).unwrap();
        assert_eq!(m.diff_ms, -3000);
    }

    #[test]
    fn test_out_of_threshold_returns_none() {
        let index = vec![entry(1000), entry(2000)];
        assert!(find_closest(50_000, &index, 10_000).is_none());
        assert!(find_closest(-50_000, &index, 10_000).is_none());
    }

    #[test]
    fn test_empty_index() {
        assert!(find_closest(1000, &[], 10_000).is_none());
    }

    #[test]
    fn test_target_before_all_entries() {
        let index = vec![entry(5000), entry(6000)];
        let m = find_closest(4200, &index, 2000).unwrap();
        assert_eq!(m.diff_ms, -800);
    }

    /// Minimal mp4 with a v0 mvhd creation time.
    fn write_mp4(path: &std::path::Path, unix_ms: i64) {
        let qt = (unix_ms / 1000 + crate::mp4::QUICKTIME_EPOCH_ADJUSTER) as u32;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&116u32.to_be_bytes());
        bytes.extend_from_slice(b"moov");
        bytes.extend_from_slice(&108u32.to_be_bytes());
        bytes.extend_from_slice(b"mvhd");
        bytes.extend_from_slice(&[0, 0, 0, 0]); // version + flags
        bytes.extend_from_slice(&qt.to_be_bytes());
        bytes.resize(bytes.len() + 92, 0);
        std::fs::write(path, &bytes).unwrap();
    }

    #[test]
    fn test_parallel_batch_matches_sequential() {
        let dir = tempfile::tempdir().unwrap();
        let base: i64 = 1_748_736_000_000;

        // Enough files to cross the rayon threshold, one per message
        let mut conversations = Conversations::new();
        conversations.insert(
            "a".to_string(),
            (0..12).map(|i| message(base + i * 60_000)).collect(),
        );
        let files: Vec<PathBuf> = (0..12)
            .map(|i| {
                let path = dir.path().join(format!("clip{i:02}.mp4"));
                write_mp4(&path, base + i * 60_000 + 2000);
                path
            })
            .collect();

        static NOOP: fn(&str, u64, u64, &str) = |_, _, _, _| {};
        let progress = ThrottledProgress::new(&NOOP);

        let sequential =
            match_video_timestamps(&files, &conversations, 10, false, false, &progress);
        let parallel = match_video_timestamps(&files, &conversations, 10, true, false, &progress);

        assert_eq!(sequential.len(), 12);
        assert_eq!(parallel, sequential);
        let m = &parallel["clip03.mp4"];
        assert_eq!((m.conv_id.as_str(), m.msg_idx, m.diff_ms), ("a", 3, 2000));
    }

    #[test]
    fn test_batch_match_skips_unreadable_files() {
        let mut conversations = Conversations::new();
        conversations.insert("a".to_string(), vec![message(1_748_736_000_000)]);
        let files = vec![PathBuf::from("/nonexistent/clip.mp4")];
        static NOOP: fn(&str, u64, u64, &str) = |_, _, _, _| {};
        let progress = ThrottledProgress::new(&NOOP);
        let matches = match_video_timestamps(&files, &conversations, 10, false, false, &progress);
        assert!(matches.is_empty());
    }
}
