use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Thumbnail variants never carry a usable ID, even when another marker is present
const THUMBNAIL_MARKER: &str = "thumbnail~";
const BLOB_MARKER: &str = "b~";

static MEDIA_ZIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"media~zip-([A-F0-9\-]+)").unwrap());
static MEDIA_OVERLAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(media|overlay)~([A-F0-9\-]+)").unwrap());

/// A media identifier embedded in an export filename or referenced by a
/// message's "Media IDs" field. The inner string is the full token including
/// its marker prefix (e.g. `b~EiAS...`, `media~28E0FFB8-...`), so it compares
/// directly against message-side ID strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MediaId {
    Blob(String),
    Media(String),
    Overlay(String),
    MediaZip(String),
}

impl MediaId {
    /// Extract the media ID from an export filename.
    ///
    /// Filenames look like:
    /// - `2025-07-27_b~EiASFU8zdmJFSGUxRDR6MzV1VUJBelNRQTIBCEgCUARgAQ.jpeg`
    /// - `2025-07-27_media~28E0FFB8-5182-4D9D-92E1-DD941C881FC5.mp4`
    /// - `2025-07-27_overlay~7E80A0BA-875C-49B0-8F4A-865EB6F8EC21.webp`
    /// - `2025-07-30_media~zip-C63E6B4D-4DF6-4C2C-A331-A49E4F1C0109.mp4`
    ///
    /// Pattern priority is strict: thumbnails are excluded outright, `b~`
    /// takes precedence over the UUID patterns, and `media~zip-` must be
    /// checked before the generic `media~` pattern.
    pub fn from_filename(filename: &str) -> Option<MediaId> {
        if filename.contains(THUMBNAIL_MARKER) {
            return None;
        }

        // b~ payload runs from the first marker to the last extension dot
        if let Some(pos) = filename.find(BLOB_MARKER) {
            let rest = &filename[pos..];
            let token = match rest.rsplit_once('.') {
                Some((id, _ext)) => id,
                None => rest,
            };
            return Some(MediaId::Blob(token.to_string()));
        }

        if let Some(m) = MEDIA_ZIP_RE.find(filename) {
            return Some(MediaId::MediaZip(m.as_str().to_string()));
        }

        if let Some(caps) = MEDIA_OVERLAY_RE.captures(filename) {
            let token = caps.get(0).unwrap().as_str().to_string();
            return match &caps[1] {
                "media" => Some(MediaId::Media(token)),
                _ => Some(MediaId::Overlay(token)),
            };
        }

        None
    }

    /// The full token string, marker prefix included.
    pub fn as_str(&self) -> &str {
        match self {
            MediaId::Blob(s) | MediaId::Media(s) | MediaId::Overlay(s) | MediaId::MediaZip(s) => s,
        }
    }
}

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
