use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use log::{debug, error, info};
use serde::{Deserialize, Serialize};

/// A single chat or snap record from a merged conversation file.
///
/// Only the fields the reconciliation engine reads and annotates are typed;
/// everything else the export carries (sender, text, kind, ...) is preserved
/// untouched through the flattened map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Pipe-separated (" | ") media ID tokens, empty when the message has
    /// none. Some exports write an explicit null here.
    #[serde(
        rename = "Media IDs",
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "String::is_empty"
    )]
    pub media_ids: String,
    /// Millisecond epoch timestamp. The export field name says microseconds
    /// but the values are milliseconds; some exports carry it as a string.
    #[serde(
        rename = "Created(microseconds)",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub created_ms: Option<serde_json::Value>,
    /// Filenames assigned to this message by a prior matching pass.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_media_files: Vec<String>,
    /// Signed file-minus-message difference for timestamp matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_diff_ms: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl MessageRecord {
    /// Coerce the timestamp field to an integer; None for missing, zero,
    /// or unparseable values.
    pub fn timestamp_ms(&self) -> Option<i64> {
        let ts = match self.created_ms.as_ref()? {
            serde_json::Value::Number(n) => n.as_i64()?,
            serde_json::Value::String(s) => s.trim().parse::<i64>().ok()?,
            _ => return None,
        };
        if ts == 0 {
            None
        } else {
            Some(ts)
        }
    }

    /// Whether a previous pass (ID or timestamp) already claimed this message.
    pub fn is_matched(&self) -> bool {
        !self.matched_media_files.is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ConversationMetadata {
    conversation_id: String,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConversationFile {
    conversation_metadata: ConversationMetadata,
    #[serde(default)]
    messages: Vec<MessageRecord>,
}

/// All messages keyed by conversation ID.
pub type Conversations = HashMap<String, Vec<MessageRecord>>;

/// Load every `<folder>/conversation.json` under the individual and group
/// conversation directories. Unreadable files are logged and skipped; a
/// missing directory contributes nothing.
pub fn load_conversations(
    conversations_dir: &Path,
    groups_dir: &Path,
) -> anyhow::Result<Conversations> {
    let mut all = Conversations::new();
    load_conversation_dir(conversations_dir, &mut all)?;
    load_conversation_dir(groups_dir, &mut all)?;
    info!("Loaded {} conversations", all.len());
    Ok(all)
}

fn load_conversation_dir(dir: &Path, into: &mut Conversations) -> anyhow::Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let conv_file = entry.path().join("conversation.json");
        if !conv_file.exists() {
            continue;
        }
        let data: ConversationFile = match File::open(&conv_file)
            .map_err(anyhow::Error::from)
            .and_then(|f| serde_json::from_reader(BufReader::new(f)).map_err(Into::into))
        {
            Ok(data) => data,
            Err(e) => {
                error!("Error loading {}: {e}", conv_file.display());
                continue;
            }
        };
        debug!(
            "Loaded {} messages from {}",
            data.messages.len(),
            data.conversation_metadata.conversation_id
        );
        into.insert(data.conversation_metadata.conversation_id, data.messages);
    }
    Ok(())
}

/// Write annotated message lists back into the conversation folders,
/// preserving each file's metadata block.
pub fn save_conversations(
    conversations: &Conversations,
    conversations_dir: &Path,
    groups_dir: &Path,
) -> anyhow::Result<usize> {
    let mut updated = 0;
    for dir in [conversations_dir, groups_dir] {
        if !dir.exists() {
            continue;
        }
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let conv_file = entry.path().join("conversation.json");
            if !conv_file.exists() {
                continue;
            }
            let file = File::open(&conv_file)?;
            let mut data: ConversationFile = serde_json::from_reader(BufReader::new(file))?;
            let Some(messages) = conversations.get(&data.conversation_metadata.conversation_id)
            else {
                continue;
            };
            data.messages = messages.clone();
            let out = File::create(&conv_file)?;
            serde_json::to_writer_pretty(BufWriter::new(out), &data)?;
            updated += 1;
        }
    }
    Ok(updated)
}
