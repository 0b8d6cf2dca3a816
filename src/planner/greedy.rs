use chrono::{DateTime, FixedOffset};
use itertools::Itertools;
use ordered_float::OrderedFloat;

use crate::domain::PriceSlot;

/// Slack for float comparisons on accumulated hours
const HOURS_EPSILON: f64 = 1e-9;

/// Result of picking the cheapest slots for a charging window
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Picked slots in chronological order
    pub slots: Vec<PriceSlot>,
    /// Usable hours the picked slots provide inside the window
    pub hours: f64,
    /// Whether the picked slots cover the requested hours
    pub sufficient: bool,
}

/// Pick the cheapest slots until their usable duration inside `[from, until)`
/// reaches `hours_needed`.
///
/// All slots draw the same power, so price per hour is the only variable and
/// taking slots cheapest-first is optimal. Equal prices go to the earlier slot.
/// When the candidates cannot cover the requirement every usable slot is
/// returned and the selection is marked insufficient.
pub fn select_cheapest(
    candidates: &[PriceSlot],
    from: DateTime<FixedOffset>,
    until: DateTime<FixedOffset>,
    hours_needed: f64,
) -> Selection {
    if hours_needed <= 0.0 {
        return Selection {
            slots: Vec::new(),
            hours: 0.0,
            sufficient: true,
        };
    }

    let mut picked = Vec::new();
    let mut hours = 0.0;
    for slot in candidates
        .iter()
        .filter(|s| s.usable_hours(from, until) > 0.0)
        .sorted_by_key(|s| (OrderedFloat(s.price), s.start))
    {
        if hours + HOURS_EPSILON >= hours_needed {
            break;
        }
        hours += slot.usable_hours(from, until);
        picked.push(slot.clone());
    }

    picked.sort_by_key(|s| s.start);
    Selection {
        slots: picked,
        hours,
        sufficient: hours + HOURS_EPSILON >= hours_needed,
    }
}
