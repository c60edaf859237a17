//! Offline replay of the movement log against cached stock levels.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use kore_core::{Aggregate, Quantity};

use crate::movement::StockMovement;
use crate::stock::{StockKey, StockLevel};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelDrift {
    pub key: StockKey,
    pub cached: Quantity,
    pub replayed: Quantity,
}

/// Replay `movements` into a zeroed copy of each level and report drift.
///
/// Pairs that have movements but no level row are reported with a cached
/// value of zero.
pub fn reconcile_levels<'a, L, M>(levels: L, movements: M) -> Vec<LevelDrift>
where
    L: IntoIterator<Item = &'a StockLevel>,
    M: IntoIterator<Item = &'a StockMovement>,
{
    let mut movements_by_key: BTreeMap<StockKey, Vec<&StockMovement>> = BTreeMap::new();
    for m in movements {
        movements_by_key.entry(m.key()).or_default().push(m);
    }

    let mut drift = Vec::new();
    for level in levels {
        let mut replayed = StockLevel::empty(level.key(), level.updated_at());
        if let Some(ms) = movements_by_key.remove(&level.key()) {
            replayed.replay(ms);
        }
        if replayed.quantity() != level.quantity() {
            drift.push(LevelDrift {
                key: level.key(),
                cached: level.quantity(),
                replayed: replayed.quantity(),
            });
        }
    }

    for (key, ms) in movements_by_key {
        let replayed: Quantity = ms.iter().map(|m| m.delta).sum();
        if !replayed.is_zero() {
            drift.push(LevelDrift {
                key,
                cached: Quantity::ZERO,
                replayed,
            });
        }
    }
    drift
}

/// On-hand quantity per pair computed purely from the log.
pub fn replay_levels<'a, M>(movements: M) -> BTreeMap<StockKey, Quantity>
where
    M: IntoIterator<Item = &'a StockMovement>,
{
    let mut levels = BTreeMap::new();
    for m in movements {
        *levels.entry(m.key()).or_insert(Quantity::ZERO) += m.delta;
    }
    levels
}
