// Standings aggregator: pure projection from the selection log to ranks.
//
// Recomputed on demand from the full log; never persisted as a source of
// truth and holding no incremental state.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::session::Selection;
use crate::catalog::Catalog;

/// How a participant's primary score is computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScoringMode {
    /// Sum of the catalog value of every item held.
    ItemValue,
    /// Count of correct predictions times a point value.
    CorrectPredictions { points_per_correct: f64 },
}

/// Secondary metric used to break primary-score ties. Per-mode tiebreaks are
/// configuration, not hardcoded logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiebreakMetric {
    /// Number of selections that landed in the correct set.
    CorrectCount,
    /// Number of items held.
    ItemsHeld,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringRules {
    #[serde(flatten)]
    pub mode: ScoringMode,
    pub tiebreak: TiebreakMetric,
    /// Item ids counted as correct predictions. Empty outside prediction
    /// scoring (and for `TiebreakMetric::CorrectCount` before results land).
    #[serde(default)]
    pub correct_items: BTreeSet<String>,
}

/// One row of the ranked standings. Ephemeral: derived, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandingEntry {
    pub participant_id: String,
    /// Dense 1-based rank: each entry's position in sorted order. Equal
    /// scores do not share a rank.
    pub rank: u32,
    pub primary_score: f64,
    pub secondary_tiebreak: u32,
}

/// Compute ranked standings for every participant in `order`.
///
/// Total and deterministic: descending primary score, then descending
/// secondary tiebreak, then ascending participant id, so replaying the same
/// log always yields an identical list.
pub fn compute(
    order: &[String],
    selections: &[Selection],
    catalog: &Catalog,
    rules: &ScoringRules,
) -> Vec<StandingEntry> {
    let mut entries: Vec<StandingEntry> = order
        .iter()
        .map(|participant_id| {
            let held: Vec<&Selection> = selections
                .iter()
                .filter(|s| &s.picker_id == participant_id)
                .collect();
            let correct = held
                .iter()
                .filter(|s| rules.correct_items.contains(&s.item_id))
                .count() as u32;

            let primary_score = match &rules.mode {
                ScoringMode::ItemValue => held
                    .iter()
                    .map(|s| catalog.item(&s.item_id).map_or(0.0, |item| item.value))
                    .sum(),
                ScoringMode::CorrectPredictions { points_per_correct } => {
                    f64::from(correct) * points_per_correct
                }
            };

            let secondary_tiebreak = match rules.tiebreak {
                TiebreakMetric::CorrectCount => correct,
                TiebreakMetric::ItemsHeld => held.len() as u32,
            };

            StandingEntry {
                participant_id: participant_id.clone(),
                rank: 0,
                primary_score,
                secondary_tiebreak,
            }
        })
        .collect();

    entries.sort_by(|a, b| {
        b.primary_score
            .total_cmp(&a.primary_score)
            .then(b.secondary_tiebreak.cmp(&a.secondary_tiebreak))
            .then(a.participant_id.cmp(&b.participant_id))
    });

    for (i, entry) in entries.iter_mut().enumerate() {
        entry.rank = i as u32 + 1;
    }
    entries
}
