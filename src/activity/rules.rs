//! Compiled profile/rule shapes for the activity extractor.
//!
//! `Profile` and its nested types derive `Deserialize` so a profile can be
//! loaded from a JSON rules file under the extractors directory; `Regex`
//! fields go through [`deserialize_regex`] since `regex::Regex` itself has
//! no serde support.

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Deserializer};

use crate::error::{OrbitMeshError, Result};
use crate::model::terminal::Region as TerminalRegion;

/// A profile matches a spawned command and holds the rules to run against
/// its terminal output.
#[derive(Deserialize)]
pub struct Profile {
    /// Matched against the provider's spawned command (e.g. `"claude"`).
    #[serde(deserialize_with = "deserialize_regex")]
    pub command_pattern: Regex,
    /// Matched against the joined argument list.
    #[serde(deserialize_with = "deserialize_regex")]
    pub args_pattern: Regex,
    /// Rules to evaluate, in order, for every screen update.
    pub rules: Vec<Rule>,
}

impl Profile {
    /// Whether this profile applies to the given command and arguments.
    pub fn matches(&self, command: &str, args: &[String]) -> bool {
        self.command_pattern.is_match(command) && self.args_pattern.is_match(&args.join(" "))
    }
}

/// Loads every `*.json` profile under `dir` and returns the first whose
/// patterns match `command`/`args`. Files that fail to parse are logged and
/// skipped rather than aborting the whole scan.
pub fn load_matching_profile(dir: &Path, command: &str, args: &[String]) -> Result<Option<Profile>> {
    let mut entries: Vec<_> = match std::fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(OrbitMeshError::Storage(e)),
    };
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let contents = std::fs::read_to_string(&path)?;
        let profile: Profile = match serde_json::from_str(&contents) {
            Ok(profile) => profile,
            Err(e) => {
                log::warn!("skipping malformed extractor profile {}: {e}", path.display());
                continue;
            }
        };
        if profile.matches(command, args) {
            return Ok(Some(profile));
        }
    }
    Ok(None)
}

fn deserialize_regex<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Regex, D::Error> {
    let pattern = String::deserialize(deserializer)?;
    Regex::new(&pattern).map_err(serde::de::Error::custom)
}

/// A compiled extraction rule.
#[derive(Deserialize)]
pub struct Rule {
    /// Stable rule identifier, used in the deterministic entry id.
    pub id: String,
    /// Whether this rule currently runs.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Region of the screen whose changes trigger this rule.
    pub trigger_region: TriggerRegion,
    /// What to extract from the triggered region.
    pub extract: Extract,
    /// How to emit the extracted data as an activity entry.
    pub emit: Emit,
    /// How to derive the entry's identity key.
    pub identity: Identity,
}

fn default_true() -> bool {
    true
}

/// The rectangular area (in screen rows/cols) that triggers a rule.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct TriggerRegion {
    pub top: u16,
    pub bottom: u16,
    pub left: Option<u16>,
    pub right: Option<u16>,
}

impl TriggerRegion {
    /// Whether this trigger region intersects `changed`.
    pub fn intersects(&self, changed: &TerminalRegion, screen_cols: u16) -> bool {
        let region = TerminalRegion {
            x: self.left.unwrap_or(0),
            y: self.top,
            x2: self.right.unwrap_or(screen_cols),
            y2: self.bottom,
        };
        region.intersects(changed)
    }

    /// This trigger region as a concrete terminal region, given screen width.
    pub fn as_region(&self, screen_cols: u16) -> TerminalRegion {
        TerminalRegion {
            x: self.left.unwrap_or(0),
            y: self.top,
            x2: self.right.unwrap_or(screen_cols),
            y2: self.bottom,
        }
    }
}

/// What a rule extracts from its triggered region.
#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Extract {
    /// Extract the region's text verbatim.
    RegionText { region: TriggerRegion },
    /// Run a regex over the region's text and extract named captures.
    RegionRegex {
        region: TriggerRegion,
        #[serde(deserialize_with = "deserialize_regex")]
        pattern: Regex,
    },
}

impl Extract {
    pub fn region(&self) -> &TriggerRegion {
        match self {
            Self::RegionText { region } => region,
            Self::RegionRegex { region, .. } => region,
        }
    }
}

/// How an extracted entry is emitted.
#[derive(Deserialize)]
pub struct Emit {
    /// The activity entry's `kind`.
    pub kind: String,
    /// Whether finalized entries outside the open window may be revised.
    #[serde(default)]
    pub update_window: UpdateWindow,
    /// Whether this extraction finalizes the entry outright.
    pub finalize: bool,
    /// Whether the entry should be marked open (default true unless
    /// `finalize` is set).
    pub open: Option<bool>,
}

/// Governs whether a rule may resurrect an entry that has left the open
/// window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateWindow {
    /// Only revise entries currently in the recent-open window.
    RecentOpen,
    /// Always allow revision, regardless of window membership.
    Always,
}

impl Default for UpdateWindow {
    fn default() -> Self {
        Self::RecentOpen
    }
}

/// How a rule derives an entry's identity key (combined with `rule.id` to
/// form the deterministic entry id).
#[derive(Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Identity {
    /// A fixed identity for `region_text` rules. `None` defaults to the
    /// rule's own id.
    Static(Option<String>),
    /// For `region_regex` rules: the named capture to use as identity
    /// (tried in order: the configured name, then `id`, then `key`),
    /// falling back to the whole match.
    Capture(Option<String>),
}

/// Parses a regex pattern, wrapping failures as a protocol error (a
/// malformed rule is a configuration mistake, not a runtime fault).
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| OrbitMeshError::Protocol(format!("invalid rule pattern: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn profile_deserializes_from_json() {
        let json = r#"{
            "command_pattern": "^claude$",
            "args_pattern": ".*",
            "rules": [{
                "id": "file_edit",
                "trigger_region": {"top": 0, "bottom": 24, "left": null, "right": null},
                "extract": {"kind": "region_text", "region": {"top": 0, "bottom": 24, "left": null, "right": null}},
                "emit": {"kind": "file_edit", "finalize": false, "open": null},
                "identity": {"kind": "static", "value": "src/main.rs"}
            }]
        }"#;
        let profile: Profile = serde_json::from_str(json).unwrap();
        assert!(profile.matches("claude", &["code".into()]));
        assert_eq!(profile.rules.len(), 1);
        assert!(profile.rules[0].enabled);
        assert_eq!(profile.rules[0].emit.update_window, UpdateWindow::RecentOpen);
        assert!(matches!(&profile.rules[0].identity, Identity::Static(Some(s)) if s == "src/main.rs"));
    }

    #[test]
    fn profile_with_invalid_regex_fails_to_deserialize() {
        let json = r#"{"command_pattern": "(", "args_pattern": ".*", "rules": []}"#;
        assert!(serde_json::from_str::<Profile>(json).is_err());
    }

    #[test]
    fn load_matching_profile_skips_malformed_files_and_matches_by_name_order() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("broken.json"),
            "not json",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("claude.json"),
            r#"{
                "command_pattern": "^claude$",
                "args_pattern": ".*",
                "rules": []
            }"#,
        )
        .unwrap();

        let profile = load_matching_profile(dir.path(), "claude", &[]).unwrap();
        assert!(profile.is_some());

        let none = load_matching_profile(dir.path(), "bash", &[]).unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn load_matching_profile_on_missing_dir_returns_none() {
        let profile = load_matching_profile(Path::new("/nonexistent/extractors/dir"), "claude", &[]).unwrap();
        assert!(profile.is_none());
    }

    #[test]
    fn trigger_region_intersects_changed_region() {
        let trigger = TriggerRegion {
            top: 0,
            bottom: 5,
            left: None,
            right: None,
        };
        let changed = TerminalRegion { x: 0, y: 3, x2: 80, y2: 4 };
        assert!(trigger.intersects(&changed, 80));
    }

    #[test]
    fn trigger_region_outside_changed_rows_does_not_intersect() {
        let trigger = TriggerRegion {
            top: 10,
            bottom: 12,
            left: None,
            right: None,
        };
        let changed = TerminalRegion { x: 0, y: 0, x2: 80, y2: 2 };
        assert!(!trigger.intersects(&changed, 80));
    }
}
