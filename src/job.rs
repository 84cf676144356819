//! Per-attempt generation state: unit tracking, stage classification,
//! stall detection, and keep-selection.
//!
//! A [`GenerationJob`] is created at the start of one transport attempt and
//! discarded at its end; it is never shared across attempts.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tokio::time::{Duration, Instant};

use crate::config::StageThresholds;

/// Resource URLs embed the unit id as a UUID before the image suffix.
static UNIT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/images/([a-f0-9-]+)\.(png|jpg)").unwrap());

/// Quality tier of a partial result. Ordered; per unit the stage only
/// moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preview,
    Medium,
    Final,
}

/// One tracked image (a video job has a single unit).
#[derive(Debug, Clone)]
pub struct MediaUnit {
    pub unit_id: String,
    pub stage: Stage,
    /// Inline payload as delivered; replaced as the stage advances.
    pub payload: String,
    pub size: usize,
    pub source_url: String,
    pub is_final: bool,
}

/// Extract the unit id from a resource URL; events whose URL does not
/// match the fixed pattern are discarded.
pub fn extract_unit_id(url: &str) -> Option<&str> {
    UNIT_ID_RE
        .captures(url)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
}

/// Classify a partial result. The full-quality render is always delivered
/// as a large `.jpg`; everything else is ordered by payload size alone.
pub fn classify_stage(url: &str, size: usize, thresholds: &StageThresholds) -> Stage {
    if url.ends_with(".jpg") && size > thresholds.final_bytes {
        Stage::Final
    } else if size > thresholds.medium_bytes {
        Stage::Medium
    } else {
        Stage::Preview
    }
}

impl MediaUnit {
    /// Build a unit from an inbound event, or `None` when the URL carries
    /// no unit id.
    pub fn from_event(url: &str, payload: String, thresholds: &StageThresholds) -> Option<Self> {
        let unit_id = extract_unit_id(url)?.to_string();
        let size = payload.len();
        let stage = classify_stage(url, size, thresholds);
        Some(Self {
            unit_id,
            stage,
            payload,
            size,
            source_url: url.to_string(),
            is_final: stage == Stage::Final,
        })
    }
}

/// One stage-advancing unit update, as reported to streaming consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub unit_id: String,
    pub stage: Stage,
    pub size: usize,
    pub is_final: bool,
    pub completed: usize,
    pub target: usize,
}

/// In-memory state for one generation attempt.
#[derive(Debug)]
pub struct GenerationJob {
    target_count: usize,
    units: HashMap<String, MediaUnit>,
    first_medium_seen_at: Option<Instant>,
}

impl GenerationJob {
    pub fn new(target_count: usize) -> Self {
        Self {
            target_count,
            units: HashMap::new(),
            first_medium_seen_at: None,
        }
    }

    pub fn target_count(&self) -> usize {
        self.target_count
    }

    pub fn completed_count(&self) -> usize {
        self.units.values().filter(|u| u.is_final).count()
    }

    pub fn is_satisfied(&self) -> bool {
        self.completed_count() >= self.target_count
    }

    /// Record an inbound unit event.
    ///
    /// Returns the resulting update, or `None` when the event was ignored
    /// because the unit already reached `Final` (stages never move
    /// backward).
    pub fn observe(&mut self, unit: MediaUnit, now: Instant) -> Option<ProgressUpdate> {
        if unit.stage == Stage::Medium && self.first_medium_seen_at.is_none() {
            self.first_medium_seen_at = Some(now);
        }

        if let Some(existing) = self.units.get(&unit.unit_id) {
            if existing.is_final {
                return None;
            }
        }

        let update = ProgressUpdate {
            unit_id: unit.unit_id.clone(),
            stage: unit.stage,
            size: unit.size,
            is_final: unit.is_final,
            completed: 0, // filled in below, after the insert
            target: self.target_count,
        };
        self.units.insert(unit.unit_id.clone(), unit);

        Some(ProgressUpdate {
            completed: self.completed_count(),
            ..update
        })
    }

    /// Silent-stall predicate: a unit reached `Medium`, no unit is final,
    /// and more than `window` has elapsed since the first medium.
    pub fn stalled(&self, now: Instant, window: Duration) -> bool {
        match self.first_medium_seen_at {
            Some(first_medium) => {
                self.completed_count() == 0 && now.duration_since(first_medium) > window
            }
            None => false,
        }
    }

    /// Whether the stall condition held at any point: a medium-stage unit
    /// exists with no final. Used for exit classification.
    pub fn has_medium_without_final(&self) -> bool {
        let has_medium = self.units.values().any(|u| u.stage == Stage::Medium);
        has_medium && self.completed_count() == 0
    }

    /// Units to keep on exit: finals first, larger payloads break ties, at
    /// most `target_count` distinct ids.
    pub fn select_keepers(&self) -> Vec<&MediaUnit> {
        let mut units: Vec<&MediaUnit> = self.units.values().collect();
        units.sort_by(|a, b| (b.is_final, b.size).cmp(&(a.is_final, a.size)));
        units.truncate(self.target_count);
        units
    }
}
