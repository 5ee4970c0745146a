use bitflags::bitflags;
use serde::Serialize;
use std::path::PathBuf;

/// One tracked filter list subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterEntry {
    /// Non-zero, never reused within a registry's lifetime.
    pub id: u64,
    pub url: String,
    pub name: String,
    pub enabled: bool,
    /// Active rule lines in the content stored at `path`.
    pub rule_count: u64,
    pub path: PathBuf,
    /// FxHash of the stored content.
    pub checksum: u64,
    /// Unix seconds of the last successful download.
    pub last_updated: u64,
}

/// Result of [`FilterController::modify`](super::FilterController::modify).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModifyOutcome {
    Unchanged,
    /// `enabled` flipped (the name may have changed as well).
    ChangedEnabled,
    ChangedName,
    /// The URL changed and a new entry took over the slot. The superseded
    /// record still owns its content file; the caller reclaims it.
    ChangedUrl { superseded: FilterEntry },
}

impl ModifyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModifyOutcome::Unchanged => "unchanged",
            ModifyOutcome::ChangedEnabled => "changed_enabled",
            ModifyOutcome::ChangedName => "changed_name",
            ModifyOutcome::ChangedUrl { .. } => "changed_url",
        }
    }

    pub fn superseded(&self) -> Option<&FilterEntry> {
        match self {
            ModifyOutcome::ChangedUrl { superseded } => Some(superseded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Downloaded content matched the stored checksum.
    Unchanged,
    Updated { previous_rules: u64, rules: u64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

bitflags! {
    /// Filters applied to [`FilterController::list`](super::FilterController::list).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ListFlags: u8 {
        const ENABLED_ONLY = 0b01;
        const DISABLED_ONLY = 0b10;
    }
}

impl ListFlags {
    pub fn admits(&self, entry: &FilterEntry) -> bool {
        if self.contains(ListFlags::ENABLED_ONLY) && !entry.enabled {
            return false;
        }
        if self.contains(ListFlags::DISABLED_ONLY) && entry.enabled {
            return false;
        }
        true
    }
}
