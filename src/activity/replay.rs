//! Drives an extractor purely from a session's frame log, for reconnect
//! and debugging without a live PTY.

use std::time::Duration;

use crate::error::Result;
use crate::storage::frame_log::{FrameDirection, FrameLog};
use crate::terminal::{AlacrittyEmulator, TerminalFacade};

use super::extractor::{ActivityOutput, Extractor};
use super::rules::Profile;

/// Replays every output frame in `frame_log` through a fresh emulator and
/// extractor, starting from offset zero.
///
/// Input frames are skipped — the activity extractor only reacts to what
/// the subprocess wrote, not what was typed at it. Output is deterministic
/// for a fixed rule set: the same frame log always replays to the same
/// sequence of upserts.
pub fn replay(
    profile: Profile,
    frame_log: &FrameLog,
    cols: u16,
    rows: u16,
    open_window_capacity: usize,
    session_id: &str,
) -> Result<(Vec<ActivityOutput>, Extractor)> {
    let emulator = AlacrittyEmulator::new(cols, rows, Duration::from_millis(0));
    let mut extractor = Extractor::new(profile, cols, rows, open_window_capacity);
    let mut outputs = Vec::new();

    let replayed = frame_log.read_all()?;
    if let Some(reason) = &replayed.corruption {
        log::warn!("frame log for {session_id} truncated at a corrupt frame: {reason}");
    }
    for frame in replayed.frames {
        if frame.direction != FrameDirection::Output {
            continue;
        }
        emulator.write(&frame.payload)?;
        let mut lines = Vec::new();
        emulator.with_lock(&mut |screen| lines = screen.to_vec());
        outputs.extend(extractor.apply_snapshot(lines, session_id));
    }

    Ok((outputs, extractor))
}
