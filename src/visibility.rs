//! Publish-time gating for sections, elements and homework deadlines.
use chrono::{DateTime, Utc};

use crate::model::{Block, HomeworkData, SectionRecord};

/// True when a publish timestamp is set and still in the future.
/// The boundary is exclusive: a unit publishing exactly at `now` is open.
pub fn is_locked(publish_datetime: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    matches!(publish_datetime, Some(at) if at > now)
}

/// Who is looking. Privileged viewers (owner/admin) bypass the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer {
    Privileged,
    Regular,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Not shown at all (explicitly unpublished).
    Hidden,
    /// Shown as a "locked until" placeholder.
    Locked { until: DateTime<Utc> },
    Visible,
}

/// Combined rule: an explicit `is_published == false` hides the unit
/// regardless of its timestamp; otherwise the time gate decides.
pub fn visibility(
    is_published: Option<bool>,
    publish_datetime: Option<DateTime<Utc>>,
    viewer: Viewer,
    now: DateTime<Utc>,
) -> Visibility {
    if viewer == Viewer::Privileged {
        return Visibility::Visible;
    }
    if is_published == Some(false) {
        return Visibility::Hidden;
    }
    match publish_datetime {
        Some(until) if is_locked(Some(until), now) => Visibility::Locked { until },
        _ => Visibility::Visible,
    }
}

pub fn block_visibility(block: &Block, viewer: Viewer, now: DateTime<Utc>) -> Visibility {
    visibility(block.is_published, block.publish_datetime, viewer, now)
}

pub fn section_visibility(section: &SectionRecord, viewer: Viewer, now: DateTime<Utc>) -> Visibility {
    visibility(Some(section.is_published), section.publish_datetime, viewer, now)
}

/// Blocks a viewer gets to see, paired with their gate decision. Hidden
/// blocks are dropped; locked ones stay so a placeholder can be drawn.
pub fn gated_blocks<'a>(
    blocks: &'a [Block],
    viewer: Viewer,
    now: DateTime<Utc>,
) -> Vec<(&'a Block, Visibility)> {
    blocks
        .iter()
        .map(|b| (b, block_visibility(b, viewer, now)))
        .filter(|(_, v)| *v != Visibility::Hidden)
        .collect()
}

/// Homework submissions stay open until the deadline passes. Uses the same
/// gate: the deadline being "locked" (in the future) means still open.
pub fn homework_open(homework: &HomeworkData, now: DateTime<Utc>) -> bool {
    match homework.deadline_at() {
        Some(deadline) => is_locked(Some(deadline), now),
        None => true,
    }
}
