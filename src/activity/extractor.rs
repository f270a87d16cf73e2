//! Per-update rule processing: converts screen changes into revisable
//! activity entries.

use chrono::Utc;
use serde_json::Value;
use sha1::{Digest, Sha1};

use crate::model::terminal::{Diff, Region};
use crate::model::ActivityEntry;
use crate::storage::ExtractorState;

use super::rules::{Extract, Identity, Profile, UpdateWindow};

/// One outcome of processing a screen update against a profile's rules.
#[derive(Debug)]
pub enum ActivityOutput {
    /// A new or revised entry.
    Upsert(ActivityEntry),
    /// An entry was finalized outright (`emit.finalize`).
    Finalized(String),
    /// An entry was evicted from the open window by a newer one.
    Evicted(String),
}

/// Converts terminal snapshots and diffs into activity entries for one
/// session, holding the row-major screen buffer and extractor state
/// between updates.
pub struct Extractor {
    profile: Profile,
    cols: u16,
    capacity: usize,
    buffer: Vec<String>,
    pub state: ExtractorState,
}

impl Extractor {
    /// Builds an extractor for a screen of the given size, with fresh state.
    pub fn new(profile: Profile, cols: u16, rows: u16, capacity: usize) -> Self {
        Self {
            profile,
            cols,
            capacity,
            buffer: vec![String::new(); rows as usize],
            state: ExtractorState::default(),
        }
    }

    /// Resumes an extractor from persisted state (e.g. after a restart).
    pub fn resume(profile: Profile, cols: u16, rows: u16, capacity: usize, state: ExtractorState) -> Self {
        let mut extractor = Self::new(profile, cols, rows, capacity);
        extractor.state = state;
        extractor
    }

    /// Applies a full-screen snapshot and runs every enabled rule against
    /// the whole screen.
    pub fn apply_snapshot(&mut self, lines: Vec<String>, session_id: &str) -> Vec<ActivityOutput> {
        self.buffer = lines;
        let region = Region::full_screen(self.buffer.len() as u16, self.cols);
        self.run_rules(&region, session_id, true)
    }

    /// Applies a partial diff, updating only the changed rows, and runs
    /// rules whose trigger region intersects the change.
    pub fn apply_diff(&mut self, diff: &Diff, session_id: &str) -> Vec<ActivityOutput> {
        for (i, row) in diff.lines.iter().enumerate() {
            let y = diff.region.y as usize + i;
            if y < self.buffer.len() {
                self.buffer[y] = row.clone();
            }
        }
        self.run_rules(&diff.region, session_id, false)
    }

    fn run_rules(&mut self, changed: &Region, session_id: &str, whole_screen: bool) -> Vec<ActivityOutput> {
        let mut outputs = Vec::new();

        for i in 0..self.profile.rules.len() {
            if !self.profile.rules[i].enabled {
                continue;
            }
            let trigger = self.profile.rules[i].extract.region();
            if !(whole_screen || trigger.intersects(changed, self.cols)) {
                continue;
            }

            let text = slice_region(&self.buffer, &trigger.as_region(self.cols));

            let (data, identity) = {
                let rule = &self.profile.rules[i];
                match &rule.extract {
                    Extract::RegionText { .. } => {
                        let identity = match &rule.identity {
                            Identity::Static(Some(s)) => s.clone(),
                            _ => rule.id.clone(),
                        };
                        (serde_json::json!({ "text": text }), identity)
                    }
                    Extract::RegionRegex { pattern, .. } => {
                        let Some(caps) = pattern.captures(&text) else {
                            continue;
                        };
                        let mut map = serde_json::Map::new();
                        for name in pattern.capture_names().flatten() {
                            if let Some(m) = caps.name(name) {
                                map.insert(name.to_string(), Value::String(m.as_str().to_string()));
                            }
                        }
                        let configured = match &rule.identity {
                            Identity::Capture(name) => name.clone(),
                            _ => None,
                        };
                        let identity = configured
                            .iter()
                            .chain(["id".to_string(), "key".to_string()].iter())
                            .find_map(|name| caps.name(name).map(|m| m.as_str().to_string()))
                            .unwrap_or_else(|| {
                                caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default()
                            });
                        (Value::Object(map), identity)
                    }
                }
            };

            let rule = &self.profile.rules[i];
            let entry_id = entry_id_for(&rule.id, &identity);

            if rule.emit.update_window == UpdateWindow::RecentOpen
                && self.state.last_rev.contains_key(&entry_id)
                && !self.state.is_open(&entry_id)
            {
                continue;
            }

            let prev_rev = self.state.last_rev.get(&entry_id).copied().unwrap_or(0);
            let rev = prev_rev + 1;
            let open = rule.emit.open.unwrap_or(!rule.emit.finalize);

            let entry = ActivityEntry {
                id: entry_id.clone(),
                session_id: session_id.to_string(),
                kind: rule.emit.kind.clone(),
                ts: Utc::now(),
                rev,
                open,
                data,
            };

            if rule.emit.finalize {
                self.state.record_finalized(&entry_id, rev);
                outputs.push(ActivityOutput::Upsert(entry));
                outputs.push(ActivityOutput::Finalized(entry_id));
            } else {
                if let Some(evicted) = self.state.record_open(&entry_id, rev, self.capacity) {
                    outputs.push(ActivityOutput::Evicted(evicted));
                }
                outputs.push(ActivityOutput::Upsert(entry));
            }
        }

        outputs
    }
}

/// Slices a region's text out of a row-major screen buffer: rune-aware,
/// trailing whitespace trimmed per row, newline-joined.
fn slice_region(buffer: &[String], region: &Region) -> String {
    let mut rows = Vec::new();
    for y in region.y..region.y2 {
        let Some(row) = buffer.get(y as usize) else { continue };
        let chars: Vec<char> = row.chars().collect();
        let end = (region.x2 as usize).min(chars.len());
        let start = (region.x as usize).min(end);
        let slice: String = chars[start..end].iter().collect();
        rows.push(slice.trim_end().to_string());
    }
    rows.join("\n")
}

/// Deterministic entry id: `"act_" + hex(sha1(rule_id + ":" + identity)[:8])`
/// — the first 8 digest bytes, hex-encoded to 16 characters.
pub fn entry_id_for(rule_id: &str, identity: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(rule_id.as_bytes());
    hasher.update(b":");
    hasher.update(identity.as_bytes());
    let digest = hasher.finalize();
    format!("act_{}", hex::encode(&digest[..8]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::rules::{Emit, Rule, TriggerRegion};

    fn text_rule(id: &str, top: u16, bottom: u16, finalize: bool) -> Rule {
        Rule {
            id: id.to_string(),
            enabled: true,
            trigger_region: TriggerRegion { top, bottom, left: None, right: None },
            extract: Extract::RegionText {
                region: TriggerRegion { top, bottom, left: None, right: None },
            },
            emit: Emit {
                kind: "note".into(),
                update_window: UpdateWindow::Always,
                finalize,
                open: None,
            },
            identity: Identity::Static(None),
        }
    }

    fn profile_with(rules: Vec<Rule>) -> Profile {
        Profile {
            command_pattern: regex::Regex::new(".*").unwrap(),
            args_pattern: regex::Regex::new(".*").unwrap(),
            rules,
        }
    }

    #[test]
    fn entry_id_is_deterministic_and_stable() {
        let a = entry_id_for("rule1", "foo");
        let b = entry_id_for("rule1", "foo");
        let c = entry_id_for("rule1", "bar");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("act_"));
    }

    #[test]
    fn snapshot_emits_upsert_with_rev_one() {
        let mut extractor = Extractor::new(profile_with(vec![text_rule("r1", 0, 2, false)]), 10, 3, 8);
        let outputs = extractor.apply_snapshot(vec!["hello".into(), "".into(), "".into()], "s1");
        let upserts: Vec<_> = outputs
            .iter()
            .filter_map(|o| match o {
                ActivityOutput::Upsert(e) => Some(e),
                _ => None,
            })
            .collect();
        assert_eq!(upserts.len(), 1);
        assert_eq!(upserts[0].rev, 1);
    }

    #[test]
    fn second_snapshot_revises_same_entry() {
        let mut extractor = Extractor::new(profile_with(vec![text_rule("r1", 0, 2, false)]), 10, 3, 8);
        extractor.apply_snapshot(vec!["hello".into(), "".into(), "".into()], "s1");
        let outputs = extractor.apply_snapshot(vec!["world".into(), "".into(), "".into()], "s1");
        let upsert = outputs
            .iter()
            .find_map(|o| match o {
                ActivityOutput::Upsert(e) => Some(e),
                _ => None,
            })
            .unwrap();
        assert_eq!(upsert.rev, 2);
    }

    #[test]
    fn finalized_entry_leaves_open_window() {
        let mut extractor = Extractor::new(profile_with(vec![text_rule("r1", 0, 2, true)]), 10, 3, 8);
        let outputs = extractor.apply_snapshot(vec!["done".into(), "".into(), "".into()], "s1");
        assert!(outputs.iter().any(|o| matches!(o, ActivityOutput::Finalized(_))));
        assert!(!extractor.state.is_open(&entry_id_for("r1", "r1")));
    }

    #[test]
    fn recent_open_window_skips_finalized_entries() {
        let mut rule = text_rule("r1", 0, 2, false);
        rule.emit.update_window = UpdateWindow::RecentOpen;
        let mut extractor = Extractor::new(profile_with(vec![rule]), 10, 3, 8);

        extractor.apply_snapshot(vec!["hello".into(), "".into(), "".into()], "s1");
        let id = entry_id_for("r1", "r1");
        extractor.state.record_finalized(&id, extractor.state.last_rev[&id]);

        let outputs = extractor.apply_snapshot(vec!["hello again".into(), "".into(), "".into()], "s1");
        assert!(outputs.is_empty());
    }
}
