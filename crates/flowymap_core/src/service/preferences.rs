//! Theme and keybind preferences.
//!
//! # Responsibility
//! - Read/write the theme and keybind entries of durable storage.
//! - Provide defaults whenever an entry is absent or unreadable.
//!
//! # Invariants
//! - Each preference lives under its own key, independent of the graph.
//! - Every keybind mutation is persisted immediately.

use crate::repo::kv_repo::{KvStore, StorageResult};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const THEME_STORAGE_KEY: &str = "flowymap-theme";
pub const KEYBINDS_STORAGE_KEY: &str = "flowymap-keybinds";

/// Action names bound by default.
pub const ACTION_DELETE: &str = "delete";
pub const ACTION_TASK: &str = "task";
pub const ACTION_MILESTONE: &str = "milestone";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    Default,
    Emerald,
    Night,
    Nord,
    Dracula,
}

impl Theme {
    pub const ALL: [Theme; 5] = [
        Theme::Default,
        Theme::Emerald,
        Theme::Night,
        Theme::Nord,
        Theme::Dracula,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Emerald => "emerald",
            Self::Night => "night",
            Self::Nord => "nord",
            Self::Dracula => "dracula",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|theme| theme.as_str().eq_ignore_ascii_case(value))
    }

    /// Theme used when none is stored.
    pub fn fallback(prefers_dark: bool) -> Self {
        if prefers_dark {
            Self::Night
        } else {
            Self::Emerald
        }
    }
}

/// Action -> ordered key names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Keybinds {
    bindings: BTreeMap<String, Vec<String>>,
}

impl Default for Keybinds {
    fn default() -> Self {
        let mut bindings = BTreeMap::new();
        bindings.insert(
            ACTION_DELETE.to_string(),
            vec!["d".to_string(), "Delete".to_string(), "Backspace".to_string()],
        );
        bindings.insert(ACTION_TASK.to_string(), vec!["q".to_string()]);
        bindings.insert(ACTION_MILESTONE.to_string(), vec!["w".to_string()]);
        Self { bindings }
    }
}

impl Keybinds {
    pub fn keys(&self, action: &str) -> &[String] {
        self.bindings.get(action).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    /// Returns the first action bound to `key`. Blank slots never match.
    pub fn action_for_key(&self, key: &str) -> Option<&str> {
        if key.is_empty() {
            return None;
        }
        self.bindings
            .iter()
            .find(|(_, keys)| keys.iter().any(|bound| bound == key))
            .map(|(action, _)| action.as_str())
    }

    /// Sets slot `index` of `action`. `index == len` appends.
    ///
    /// Returns `false` when the index is past the end.
    pub fn set_key(&mut self, action: &str, index: usize, value: impl Into<String>) -> bool {
        let keys = self.bindings.entry(action.to_string()).or_default();
        match index.cmp(&keys.len()) {
            std::cmp::Ordering::Less => keys[index] = value.into(),
            std::cmp::Ordering::Equal => keys.push(value.into()),
            std::cmp::Ordering::Greater => return false,
        }
        true
    }

    /// Appends an empty slot to `action`.
    pub fn add_key(&mut self, action: &str) {
        self.bindings
            .entry(action.to_string())
            .or_default()
            .push(String::new());
    }

    /// Removes slot `index` of `action`. Returns whether a slot was removed.
    pub fn remove_key(&mut self, action: &str, index: usize) -> bool {
        match self.bindings.get_mut(action) {
            Some(keys) if index < keys.len() => {
                keys.remove(index);
                true
            }
            _ => false,
        }
    }
}

/// Preference entries on top of a key-value store.
pub struct PreferenceStore<K: KvStore> {
    kv: K,
}

impl<K: KvStore> PreferenceStore<K> {
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    /// Stored theme, or the fallback for `prefers_dark`.
    pub fn theme(&self, prefers_dark: bool) -> Theme {
        match self.kv.get(THEME_STORAGE_KEY) {
            Ok(Some(value)) => Theme::parse(&value).unwrap_or_else(|| {
                warn!("event=preferences_load module=preferences status=skip key=theme reason=unknown_value");
                Theme::fallback(prefers_dark)
            }),
            Ok(None) => Theme::fallback(prefers_dark),
            Err(err) => {
                warn!(
                    "event=preferences_load module=preferences status=error key=theme error={}",
                    err
                );
                Theme::fallback(prefers_dark)
            }
        }
    }

    pub fn set_theme(&self, theme: Theme) -> StorageResult<()> {
        self.kv.set(THEME_STORAGE_KEY, theme.as_str())
    }

    /// Stored keybinds, or the defaults when absent or unreadable.
    pub fn keybinds(&self) -> Keybinds {
        let raw = match self.kv.get(KEYBINDS_STORAGE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Keybinds::default(),
            Err(err) => {
                warn!(
                    "event=preferences_load module=preferences status=error key=keybinds error={}",
                    err
                );
                return Keybinds::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|err| {
            warn!(
                "event=preferences_load module=preferences status=error key=keybinds error_code=corrupt_payload error={}",
                err
            );
            Keybinds::default()
        })
    }

    pub fn save_keybinds(&self, keybinds: &Keybinds) -> StorageResult<()> {
        let text = serde_json::to_string(keybinds)?;
        self.kv.set(KEYBINDS_STORAGE_KEY, &text)
    }

    /// Loads keybinds, applies `edit`, persists and returns the result.
    pub fn update_keybinds(&self, edit: impl FnOnce(&mut Keybinds)) -> StorageResult<Keybinds> {
        let mut keybinds = self.keybinds();
        edit(&mut keybinds);
        self.save_keybinds(&keybinds)?;
        Ok(keybinds)
    }

    pub fn restore_default_keybinds(&self) -> StorageResult<Keybinds> {
        let keybinds = Keybinds::default();
        self.save_keybinds(&keybinds)?;
        Ok(keybinds)
    }
}
