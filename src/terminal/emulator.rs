//! `alacritty_terminal`-backed implementation of [`TerminalFacade`].
//!
//! We pick `alacritty_terminal` over a VT100-only parser (as the PTY
//! subsystem this is adapted from does) because it exposes the live cell
//! grid directly — the activity extractor and reconnect snapshots both need
//! to slice arbitrary regions out of the current screen, not just render it
//! to a string.
//!
//! Change detection follows the same shape as a screen-hash-then-diff
//! renderer: after each write, hash the grid's visible contents plus cursor
//! position; if the hash is unchanged, nothing is emitted. If it changed,
//! diff row-by-row against the last snapshot to find the smallest changed
//! region, debounced so a burst of writes collapses into one `region_changed`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::mpsc as std_mpsc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use alacritty_terminal::event::{Event as AlacrittyEvent, EventListener};
use alacritty_terminal::grid::Dimensions;
use alacritty_terminal::index::{Column, Line, Point};
use alacritty_terminal::term::{Config as TermConfig, Term, TermMode};
use alacritty_terminal::vte::ansi::Processor;

use crate::broadcast::Broadcaster;
use crate::error::Result;
use crate::model::terminal::{Diff, DiffReason, Region};

use super::facade::{Key, TerminalEvent, TerminalFacade};

#[derive(Clone)]
struct Listener(std_mpsc::Sender<AlacrittyEvent>);

impl EventListener for Listener {
    fn send_event(&self, event: AlacrittyEvent) {
        let _ = self.0.send(event);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct GridSize {
    cols: u16,
    rows: u16,
}

impl Dimensions for GridSize {
    fn total_lines(&self) -> usize {
        self.rows as usize
    }

    fn screen_lines(&self) -> usize {
        self.rows as usize
    }

    fn columns(&self) -> usize {
        self.cols as usize
    }
}

struct LastSnapshot {
    lines: Vec<String>,
    cursor: (u16, u16),
    alt_screen: bool,
    hash: u64,
}

/// A terminal emulator backed by `alacritty_terminal::Term`, with
/// debounced change notifications forwarded through a [`Broadcaster`].
pub struct AlacrittyEmulator {
    term: Mutex<Term<Listener>>,
    processor: Mutex<Processor>,
    events_rx: Mutex<std_mpsc::Receiver<AlacrittyEvent>>,
    broadcaster: Broadcaster<TerminalEvent>,
    last: Mutex<LastSnapshot>,
    last_emit: Mutex<Instant>,
    debounce: Duration,
}

impl AlacrittyEmulator {
    /// Creates an emulator with the given grid size and debounce window.
    pub fn new(cols: u16, rows: u16, debounce: Duration) -> Self {
        let size = GridSize { cols, rows };
        let (tx, rx) = std_mpsc::channel();
        let term = Term::new(TermConfig::default(), &size, Listener(tx));
        let blank_lines = vec![" ".repeat(cols as usize); rows as usize];

        Self {
            term: Mutex::new(term),
            processor: Mutex::new(Processor::new()),
            events_rx: Mutex::new(rx),
            broadcaster: Broadcaster::new(),
            last: Mutex::new(LastSnapshot {
                lines: blank_lines,
                cursor: (0, 0),
                alt_screen: false,
                hash: 0,
            }),
            last_emit: Mutex::new(Instant::now() - debounce),
            debounce,
        }
    }

    /// Subscribes to this emulator's terminal events.
    pub fn subscribe(&self, buffer: usize) -> tokio::sync::mpsc::Receiver<TerminalEvent> {
        self.broadcaster.subscribe(buffer)
    }

    fn grid_lines(term: &Term<Listener>) -> Vec<String> {
        let cols = term.columns();
        let rows = term.screen_lines();
        let mut lines = Vec::with_capacity(rows);
        for row in 0..rows {
            let mut line = String::with_capacity(cols);
            for col in 0..cols {
                let point = Point::new(Line(row as i32), Column(col));
                let cell = &term.grid()[point];
                line.push(cell.c);
            }
            lines.push(line);
        }
        lines
    }

    fn snapshot_hash(lines: &[String], cursor: (u16, u16), alt_screen: bool) -> u64 {
        let mut hasher = DefaultHasher::new();
        for line in lines {
            line.hash(&mut hasher);
        }
        cursor.hash(&mut hasher);
        alt_screen.hash(&mut hasher);
        hasher.finish()
    }

    fn drain_immediate_events(&self) {
        let rx = self.events_rx.lock().expect("emulator events mutex poisoned");
        while let Ok(event) = rx.try_recv() {
            if matches!(event, AlacrittyEvent::Bell) {
                self.broadcaster.broadcast(TerminalEvent::Bell);
            }
        }
    }

    fn diff_and_emit(&self) {
        self.drain_immediate_events();

        let term = self.term.lock().expect("emulator term mutex poisoned");
        let lines = Self::grid_lines(&term);
        let cursor_point = term.grid().cursor.point;
        let cursor = (cursor_point.column.0 as u16, cursor_point.line.0 as u16);
        let alt_screen = term.mode().contains(TermMode::ALT_SCREEN);
        drop(term);

        let hash = Self::snapshot_hash(&lines, cursor, alt_screen);
        let mut last = self.last.lock().expect("emulator snapshot mutex poisoned");

        if hash == last.hash {
            return;
        }

        if cursor != last.cursor {
            self.broadcaster.broadcast(TerminalEvent::CursorMoved {
                x: cursor.0,
                y: cursor.1,
            });
        }

        let mut last_emit = self.last_emit.lock().expect("emulator debounce mutex poisoned");
        let now = Instant::now();
        let due = now.duration_since(*last_emit) >= self.debounce;

        if alt_screen != last.alt_screen {
            self.emit_diff(&lines, DiffReason::ScreenSwitch);
            *last_emit = now;
        } else if due {
            match diff_region(&last.lines, &lines) {
                Some((region, reason)) => {
                    let region_lines = lines[region.y as usize..region.y2 as usize].to_vec();
                    self.broadcaster.broadcast(TerminalEvent::RegionChanged(Diff {
                        region,
                        lines: region_lines,
                        reason,
                    }));
                }
                None => {}
            }
            *last_emit = now;
        }

        last.lines = lines;
        last.cursor = cursor;
        last.alt_screen = alt_screen;
        last.hash = hash;
    }

    fn emit_diff(&self, lines: &[String], reason: DiffReason) {
        let rows = lines.len() as u16;
        let cols = lines.first().map(|l| l.chars().count() as u16).unwrap_or(0);
        self.broadcaster.broadcast(TerminalEvent::RegionChanged(Diff {
            region: Region::full_screen(rows, cols),
            lines: lines.to_vec(),
            reason,
        }));
    }
}

fn diff_region(before: &[String], after: &[String]) -> Option<(Region, DiffReason)> {
    if before.len() != after.len() {
        let rows = after.len() as u16;
        let cols = after.first().map(|l| l.chars().count() as u16).unwrap_or(0);
        return Some((Region::full_screen(rows, cols), DiffReason::Redraw));
    }

    let first_changed = before.iter().zip(after.iter()).position(|(a, b)| a != b)?;
    let last_changed = before
        .iter()
        .zip(after.iter())
        .rposition(|(a, b)| a != b)
        .unwrap_or(first_changed);

    let cols = after.first().map(|l| l.chars().count() as u16).unwrap_or(0);
    let region = Region {
        x: 0,
        y: first_changed as u16,
        x2: cols,
        y2: (last_changed + 1) as u16,
    };
    Some((region, DiffReason::Text))
}

impl TerminalFacade for AlacrittyEmulator {
    fn write(&self, bytes: &[u8]) -> Result<()> {
        {
            let mut term = self.term.lock().expect("emulator term mutex poisoned");
            let mut processor = self.processor.lock().expect("emulator processor mutex poisoned");
            processor.advance(&mut *term, bytes);
        }
        self.diff_and_emit();
        Ok(())
    }

    fn send_key(&self, key: Key) -> Result<Vec<u8>> {
        Ok(match key {
            Key::Char(c) => c.to_string().into_bytes(),
            Key::Enter => b"\r".to_vec(),
            Key::Backspace => vec![0x7f],
            Key::Tab => b"\t".to_vec(),
            Key::Escape => vec![0x1b],
            Key::Up => b"\x1b[A".to_vec(),
            Key::Down => b"\x1b[B".to_vec(),
            Key::Right => b"\x1b[C".to_vec(),
            Key::Left => b"\x1b[D".to_vec(),
            Key::CtrlC => vec![0x03],
        })
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let mut term = self.term.lock().expect("emulator term mutex poisoned");
        term.resize(GridSize { cols, rows });
        drop(term);
        self.diff_and_emit();
        Ok(())
    }

    fn with_lock(&self, f: &mut dyn FnMut(&[String])) {
        let term = self.term.lock().expect("emulator term mutex poisoned");
        let lines = Self::grid_lines(&term);
        drop(term);
        f(&lines);
    }

    fn size(&self) -> (u16, u16) {
        let term = self.term.lock().expect("emulator term mutex poisoned");
        (term.columns() as u16, term.screen_lines() as u16)
    }

    fn line(&self, y: u16) -> Option<String> {
        let term = self.term.lock().expect("emulator term mutex poisoned");
        let lines = Self::grid_lines(&term);
        lines.into_iter().nth(y as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writing_text_updates_first_line() {
        let emulator = AlacrittyEmulator::new(10, 3, Duration::from_millis(0));
        emulator.write(b"hi").unwrap();
        let line = emulator.line(0).unwrap();
        assert!(line.starts_with("hi"));
    }

    #[test]
    fn bell_is_forwarded_as_event() {
        let emulator = AlacrittyEmulator::new(10, 3, Duration::from_millis(0));
        let mut events = emulator.subscribe(8);
        emulator.write(b"\x07").unwrap();
        let event = events.try_recv();
        assert!(matches!(event, Ok(TerminalEvent::Bell)));
    }

    #[test]
    fn resize_changes_reported_size() {
        let emulator = AlacrittyEmulator::new(10, 3, Duration::from_millis(0));
        emulator.resize(20, 6).unwrap();
        assert_eq!(emulator.size(), (20, 6));
    }
}
