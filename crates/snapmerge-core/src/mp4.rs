use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use log::debug;
use serde::Deserialize;

/// 4-byte big-endian size + 4-byte type.
pub const ATOM_HEADER_SIZE: usize = 8;
/// Seconds between the QuickTime epoch (1904-01-01) and the Unix epoch.
pub const QUICKTIME_EPOCH_ADJUSTER: i64 = 2_082_844_800;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Extract the creation timestamp of a video container, in milliseconds
/// since the Unix epoch.
///
/// Walks the atom structure directly first (header-only reads, no
/// subprocess); when that fails and `probe_fallback` is set, asks ffprobe
/// for the audio stream's creation_time tag. Returns None rather than an
/// error for every malformed-container or tool-failure case.
pub fn extract_mp4_timestamp(path: &Path, probe_fallback: bool) -> Option<i64> {
    let timestamp = parse_mp4_timestamp_binary(path);
    if timestamp.is_none() && probe_fallback {
        debug!("Binary parsing failed for {}, trying ffprobe", path.display());
        return parse_mp4_timestamp_ffprobe(path);
    }
    timestamp
}

/// Extract creation time by reading the `moov`/`mvhd` atoms directly.
pub fn parse_mp4_timestamp_binary(path: &Path) -> Option<i64> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            debug!("Cannot open {}: {e}", path.display());
            return None;
        }
    };
    let creation = match read_mvhd_creation_time(&mut BufReader::new(file)) {
        Ok(c) => c?,
        Err(e) => {
            debug!("Error parsing {}: {e}", path.display());
            return None;
        }
    };
    if creation > 0 {
        // QuickTime epoch seconds -> Unix epoch milliseconds
        Some((creation as i64 - QUICKTIME_EPOCH_ADJUSTER) * 1000)
    } else {
        None
    }
}

fn read_mvhd_creation_time<R: Read + Seek>(r: &mut R) -> io::Result<Option<u64>> {
    // Scan top-level atoms for moov
    loop {
        let mut header = [0u8; ATOM_HEADER_SIZE];
        if r.read_exact(&mut header).is_err() {
            return Ok(None); // stream exhausted without a moov atom
        }
        if &header[4..8] == b"moov" {
            break;
        }
        let atom_size = u32::from_be_bytes(header[0..4].try_into().unwrap()) as u64;
        match atom_size {
            0 => return Ok(None), // atom extends to end of file
            1 => {
                // 64-bit extended size follows the header
                let mut ext = [0u8; 8];
                if r.read_exact(&mut ext).is_err() {
                    return Ok(None);
                }
                let extended = u64::from_be_bytes(ext);
                if extended < 16 {
                    return Ok(None);
                }
                r.seek(SeekFrom::Current(extended as i64 - 16))?;
            }
            2..=7 => return Ok(None), // size smaller than its own header
            _ => {
                r.seek(SeekFrom::Current(atom_size as i64 - 8))?;
            }
        }
    }

    // mvhd is expected to be the first child of moov
    let mut header = [0u8; ATOM_HEADER_SIZE];
    if r.read_exact(&mut header).is_err() {
        return Ok(None);
    }
    if &header[4..8] == b"cmov" {
        return Ok(None); // compressed movie atom, not parseable
    }
    if &header[4..8] != b"mvhd" {
        return Ok(None);
    }

    let mut version = [0u8; 1];
    if r.read_exact(&mut version).is_err() {
        return Ok(None);
    }
    r.seek(SeekFrom::Current(3))?; // flags

    // Creation time: 32-bit for version 0, 64-bit for version 1
    if version[0] == 0 {
        let mut buf = [0u8; 4];
        if r.read_exact(&mut buf).is_err() {
            return Ok(None);
        }
        Ok(Some(u32::from_be_bytes(buf) as u64))
    } else {
        let mut buf = [0u8; 8];
        if r.read_exact(&mut buf).is_err() {
            return Ok(None);
        }
        Ok(Some(u64::from_be_bytes(buf)))
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    tags: Option<ProbeTags>,
}

#[derive(Debug, Deserialize)]
struct ProbeTags {
    creation_time: Option<String>,
}

/// Extract creation time from the audio stream via ffprobe.
pub fn parse_mp4_timestamp_ffprobe(path: &Path) -> Option<i64> {
    let stdout = run_ffprobe(path)?;
    let probe: ProbeOutput = match serde_json::from_slice(&stdout) {
        Ok(p) => p,
        Err(e) => {
            debug!("Failed to parse ffprobe output for {}: {e}", path.display());
            return None;
        }
    };

    let creation_time = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
        .and_then(|s| s.tags.as_ref())
        .and_then(|t| t.creation_time.as_deref())?;

    // ISO-8601, e.g. "2025-07-28T15:28:18.000000Z"
    let dt = chrono::DateTime::parse_from_rfc3339(creation_time).ok()?;
    Some(dt.timestamp_millis())
}

fn run_ffprobe(path: &Path) -> Option<Vec<u8>> {
    let mut child = match Command::new("ffprobe")
        .args(["-v", "quiet", "-print_format", "json", "-show_streams"])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(c) => c,
        Err(e) => {
            debug!("Failed to run ffprobe: {e}");
            return None;
        }
    };

    // Drain stdout on its own thread so a child producing more than the OS
    // pipe buffer never blocks against the poll loop below.
    let mut stdout = child.stdout.take()?;
    let reader = std::thread::spawn(move || {
        let mut out = Vec::new();
        stdout.read_to_end(&mut out).ok().map(|_| out)
    });

    let deadline = Instant::now() + PROBE_TIMEOUT;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    debug!("ffprobe failed for {}", path.display());
                    let _ = reader.join();
                    return None;
                }
                break;
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    debug!("ffprobe timeout for {}", path.display());
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = reader.join();
                    return None;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                let _ = reader.join();
                return None;
            }
        }
    }

    reader.join().ok()?
}
