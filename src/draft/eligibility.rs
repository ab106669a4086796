// Eligibility policy: which items a participant may select on their turn.
//
// `check_item` is the single primitive; `selectable_items` is derived from it
// by filtering the catalog, so the commit-time check and the auto-selection
// pool can never disagree.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::session::Selection;
use super::IneligibleReason;
use crate::catalog::Catalog;

/// The closed set of eligibility regimes, selected by configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EligibilityMode {
    /// Any unselected catalog item; ownership is globally unique unless
    /// shared ownership is explicitly allowed.
    OpenPool {
        #[serde(default)]
        allow_shared_items: bool,
    },
    /// Items are partitioned into categories; a participant holds at most
    /// one item per category unless duplicates are allowed.
    CategoryConstrained {
        /// Allow a participant to fill the same category more than once.
        #[serde(default)]
        allow_duplicate_categories: bool,
        /// Forbid two participants from holding the same item.
        #[serde(default)]
        unique_across_participants: bool,
        /// Restrict each round to a single category, advancing through the
        /// catalog's declared category order round by round.
        #[serde(default)]
        round_locked: bool,
    },
}

/// The category bound to `round_number` in round-locked mode: categories
/// advance in catalog declaration order and clamp at the last one.
pub fn active_category(catalog: &Catalog, round_number: u32) -> Option<&str> {
    let categories = catalog.categories();
    if categories.is_empty() {
        return None;
    }
    let index = (round_number.saturating_sub(1) as usize).min(categories.len() - 1);
    Some(categories[index].as_str())
}

/// Decide whether `item_id` may be selected by `participant_id` on the
/// current turn, given every selection committed so far.
pub fn check_item(
    mode: &EligibilityMode,
    catalog: &Catalog,
    participant_id: &str,
    round_number: u32,
    prior: &[Selection],
    item_id: &str,
) -> Result<(), IneligibleReason> {
    let item = catalog
        .item(item_id)
        .ok_or(IneligibleReason::UnknownItem)?;

    match mode {
        EligibilityMode::OpenPool { allow_shared_items } => {
            if !allow_shared_items && prior.iter().any(|s| s.item_id == item_id) {
                return Err(IneligibleReason::AlreadyOwned);
            }
            Ok(())
        }
        EligibilityMode::CategoryConstrained {
            allow_duplicate_categories,
            unique_across_participants,
            round_locked,
        } => {
            // Uncategorized items are not part of a category-constrained pool.
            let category = item
                .category
                .as_deref()
                .ok_or(IneligibleReason::UnknownItem)?;

            if *unique_across_participants
                && prior
                    .iter()
                    .any(|s| s.item_id == item_id && s.picker_id != participant_id)
            {
                return Err(IneligibleReason::AlreadyOwned);
            }

            if *round_locked && active_category(catalog, round_number) != Some(category) {
                return Err(IneligibleReason::WrongCategoryForRound);
            }

            if !allow_duplicate_categories {
                let filled = prior
                    .iter()
                    .filter(|s| s.picker_id == participant_id)
                    .any(|s| catalog.category_of(&s.item_id) == Some(category));
                if filled {
                    return Err(IneligibleReason::CategoryFilled);
                }
            }

            Ok(())
        }
    }
}

/// The full set of items `participant_id` may select this turn.
pub fn selectable_items(
    mode: &EligibilityMode,
    catalog: &Catalog,
    participant_id: &str,
    round_number: u32,
    prior: &[Selection],
) -> BTreeSet<String> {
    catalog
        .item_ids()
        .filter(|id| check_item(mode, catalog, participant_id, round_number, prior, id).is_ok())
        .map(|id| id.to_string())
        .collect()
}
