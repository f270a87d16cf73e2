//! Binary PTY frame log: raw capture of everything read from or written to
//! a PTY, for activity-extractor replay.
//!
//! Wire shape per frame: `[uvarint length][1 byte direction][8 byte LE
//! timestamp_ns][payload; length bytes]`. `length` counts the payload only.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{OrbitMeshError, Result};

/// Which side of the PTY a frame's payload came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameDirection {
    /// Bytes written to the PTY (keystrokes, resize-triggered redraws).
    Input,
    /// Bytes read back from the PTY (the agent's terminal output).
    Output,
}

impl FrameDirection {
    fn to_byte(self) -> u8 {
        match self {
            Self::Input => 0,
            Self::Output => 1,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(Self::Input),
            1 => Ok(Self::Output),
            other => Err(OrbitMeshError::Parse(format!(
                "corrupt frame: unknown direction byte {other}"
            ))),
        }
    }
}

/// One decoded frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Which side of the PTY this payload came from.
    pub direction: FrameDirection,
    /// Nanoseconds since the Unix epoch when the frame was captured.
    pub timestamp_ns: u64,
    /// Raw bytes.
    pub payload: Vec<u8>,
}

/// Append-only binary capture of a session's PTY traffic.
pub struct FrameLog {
    path: PathBuf,
    max_frame_bytes: u64,
    file: Mutex<File>,
}

impl FrameLog {
    /// Opens (creating if absent) the frame log for `session_id` under `dir`.
    pub fn open(dir: &Path, session_id: &str, max_frame_bytes: u64) -> Result<Self> {
        let path = dir.join(format!("{session_id}.frames.bin"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            max_frame_bytes,
            file: Mutex::new(file),
        })
    }

    /// Appends a frame captured right now.
    pub fn append(&self, direction: FrameDirection, payload: &[u8]) -> Result<()> {
        if payload.len() as u64 > self.max_frame_bytes {
            return Err(OrbitMeshError::Parse(format!(
                "frame of {} bytes exceeds cap of {} bytes",
                payload.len(),
                self.max_frame_bytes
            )));
        }
        let timestamp_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;

        let mut buf = Vec::with_capacity(payload.len() + 16);
        encode_uvarint(payload.len() as u64, &mut buf);
        buf.push(direction.to_byte());
        buf.extend_from_slice(&timestamp_ns.to_le_bytes());
        buf.extend_from_slice(payload);

        let mut file = self.file.lock().expect("frame log mutex poisoned");
        file.write_all(&buf)?;
        Ok(())
    }

    /// Reads every complete frame from the start of the log. A partial
    /// trailing frame (the writer was interrupted mid-append) is reported
    /// via `ReplayResult::trailing_partial_bytes` rather than as an error.
    /// A corrupt frame stops decoding but does not discard the frames
    /// successfully decoded before it — the log remains valid up to that
    /// offset, reported via `ReplayResult::corruption`.
    pub fn read_all(&self) -> Result<ReplayResult> {
        let mut contents = Vec::new();
        if self.path.exists() {
            File::open(&self.path)?.read_to_end(&mut contents)?;
        }
        Ok(self.decode_from(&contents))
    }

    fn decode_from(&self, contents: &[u8]) -> ReplayResult {
        let mut offset = 0usize;
        let mut frames = Vec::new();

        loop {
            if offset == contents.len() {
                break;
            }
            let remaining = &contents[offset..];

            let Some((length, varint_len)) = decode_uvarint(remaining) else {
                // Not enough bytes yet to even read the length: partial frame.
                break;
            };

            if length == 0 || length > self.max_frame_bytes {
                return ReplayResult {
                    frames,
                    trailing_partial_bytes: contents.len() - offset,
                    corruption: Some(format!(
                        "corrupt frame at offset {offset}: length {length} invalid"
                    )),
                };
            }

            let header_len = varint_len + 1 + 8;
            let frame_len = header_len + length as usize;
            if remaining.len() < frame_len {
                break;
            }

            let direction = match FrameDirection::from_byte(remaining[varint_len]) {
                Ok(direction) => direction,
                Err(e) => {
                    return ReplayResult {
                        frames,
                        trailing_partial_bytes: contents.len() - offset,
                        corruption: Some(e.to_string()),
                    };
                }
            };
            let ts_bytes: [u8; 8] = remaining[varint_len + 1..varint_len + 9]
                .try_into()
                .expect("slice is exactly 8 bytes");
            let timestamp_ns = u64::from_le_bytes(ts_bytes);
            let payload = remaining[header_len..frame_len].to_vec();

            frames.push(Frame {
                direction,
                timestamp_ns,
                payload,
            });
            offset += frame_len;
        }

        ReplayResult {
            frames,
            trailing_partial_bytes: contents.len() - offset,
            corruption: None,
        }
    }
}

/// Result of replaying a frame log from the start (or an arbitrary byte
/// offset, via `read_all` on a log truncated to that offset by the caller).
pub struct ReplayResult {
    /// Every frame successfully decoded, up to the point of corruption if any.
    pub frames: Vec<Frame>,
    /// Bytes left over after the last complete frame — a writer was
    /// interrupted mid-append and will complete it on the next append.
    pub trailing_partial_bytes: usize,
    /// Set when a corrupt frame stopped decoding early. `frames` still holds
    /// every frame decoded before the corruption.
    pub corruption: Option<String>,
}

fn encode_uvarint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn decode_uvarint(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, &byte) in bytes.iter().enumerate() {
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_and_replay_round_trip() {
        let dir = TempDir::new().unwrap();
        let log = FrameLog::open(dir.path(), "s1", 16 * 1024 * 1024).unwrap();
        log.append(FrameDirection::Output, b"hello").unwrap();
        log.append(FrameDirection::Input, b"\r").unwrap();

        let replay = log.read_all().unwrap();
        assert_eq!(replay.frames.len(), 2);
        assert_eq!(replay.frames[0].direction, FrameDirection::Output);
        assert_eq!(replay.frames[0].payload, b"hello");
        assert_eq!(replay.frames[1].direction, FrameDirection::Input);
        assert_eq!(replay.trailing_partial_bytes, 0);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let dir = TempDir::new().unwrap();
        let log = FrameLog::open(dir.path(), "s1", 4).unwrap();
        let err = log.append(FrameDirection::Output, b"too big").unwrap_err();
        assert!(matches!(err, OrbitMeshError::Parse(_)));
    }

    #[test]
    fn zero_length_frame_is_corruption_but_keeps_the_valid_prefix() {
        let dir = TempDir::new().unwrap();
        let log = FrameLog::open(dir.path(), "s1", 1024).unwrap();
        let mut bytes = Vec::new();
        encode_uvarint(5, &mut bytes);
        bytes.push(1);
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(b"hello");

        encode_uvarint(0, &mut bytes);
        bytes.push(1);
        bytes.extend_from_slice(&0u64.to_le_bytes());

        let result = log.decode_from(&bytes);
        assert!(result.corruption.is_some());
        assert_eq!(result.frames.len(), 1);
        assert_eq!(result.frames[0].payload, b"hello");
    }

    #[test]
    fn partial_trailing_frame_is_reported_not_errored() {
        let dir = TempDir::new().unwrap();
        let log = FrameLog::open(dir.path(), "s1", 1024).unwrap();
        let mut bytes = Vec::new();
        encode_uvarint(5, &mut bytes);
        bytes.push(1);
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(b"hi"); // only 2 of 5 payload bytes present

        let result = log.decode_from(&bytes);
        assert!(result.corruption.is_none());
        assert!(result.frames.is_empty());
        assert_eq!(result.trailing_partial_bytes, bytes.len());
    }
}
