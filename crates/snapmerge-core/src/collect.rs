use std::collections::HashSet;

use log::info;

use crate::conversations::Conversations;

/// The export separates multiple IDs with a pipe padded by single spaces,
/// never a bare `|`.
const ID_SEPARATOR: &str = " | ";

/// Counters from one pass over the message corpus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdStats {
    pub total_messages: usize,
    pub messages_with_media: usize,
    /// Messages whose field held more than one ID.
    pub pipe_separated: usize,
    /// Individual ID occurrences, not deduplicated.
    pub total_ids: usize,
}

/// Split a "Media IDs" field into individual ID tokens.
pub fn split_media_ids(media_ids: &str) -> Vec<&str> {
    media_ids
        .split(ID_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Collect every unique media ID referenced across all conversations.
pub fn collect_media_ids(conversations: &Conversations) -> (HashSet<String>, IdStats) {
    let mut all_ids = HashSet::new();
    let mut stats = IdStats::default();

    for messages in conversations.values() {
        for message in messages {
            stats.total_messages += 1;
            if message.media_ids.is_empty() {
                continue;
            }
            stats.messages_with_media += 1;

            let ids = split_media_ids(&message.media_ids);
            if ids.len() > 1 {
                stats.pipe_separated += 1;
            }
            stats.total_ids += ids.len();
            all_ids.extend(ids.iter().map(|s| s.to_string()));
        }
    }

    info!(
        "Extracted {} unique media IDs from {} messages ({} pipe-separated)",
        all_ids.len(),
        stats.total_messages,
        stats.pipe_separated
    );
    (all_ids, stats)
}
