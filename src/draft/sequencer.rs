// Turn sequencer: pure mapping from overall pick number to picker identity.

use serde::{Deserialize, Serialize};

use super::session::{Discipline, DraftConfiguration};
use super::DraftError;

/// Where a given overall pick falls in the draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnSlot {
    /// 1-indexed round number.
    pub round: u32,
    /// 1-indexed position within the round, in proposal order (before any
    /// serpentine mirroring).
    pub position_in_round: u32,
    pub picker_id: String,
}

/// Decompose an overall pick number into its round, position, and picker.
///
/// Defined only for `1 <= overall_pick <= total_picks()`; anything else is an
/// `OutOfRange` error, which indicates a caller bug rather than user input.
/// This is the single source of truth for "whose turn is pick k" -- both the
/// next-turn advance and the commit-time ownership check go through here.
pub fn slot_for(config: &DraftConfiguration, overall_pick: u32) -> Result<TurnSlot, DraftError> {
    let max = config.total_picks();
    if overall_pick == 0 || overall_pick > max {
        return Err(DraftError::OutOfRange {
            pick: overall_pick,
            max,
        });
    }

    let n = config.participant_count();
    let round = (overall_pick - 1) / n + 1;
    let position_in_round = (overall_pick - 1) % n + 1;

    let index = match config.discipline {
        Discipline::Fixed => position_in_round - 1,
        // Even rounds run the order backwards.
        Discipline::Serpentine => {
            if round % 2 == 0 {
                n - position_in_round
            } else {
                position_in_round - 1
            }
        }
    };

    Ok(TurnSlot {
        round,
        position_in_round,
        picker_id: config.order[index as usize].clone(),
    })
}

/// The participant who owns the given overall pick.
pub fn picker_for(config: &DraftConfiguration, overall_pick: u32) -> Result<String, DraftError> {
    slot_for(config, overall_pick).map(|slot| slot.picker_id)
}
