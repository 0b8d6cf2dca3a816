use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use strum::Display;

use super::PriceHorizon;

/// Live price relative to the horizon average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PriceStatus {
    VeryCheap,
    Cheap,
    Expensive,
    Unknown,
}

const VERY_CHEAP_RATIO: f64 = 0.8;

impl PriceStatus {
    pub fn classify(horizon: &PriceHorizon, now: DateTime<FixedOffset>) -> Self {
        match (horizon.price_at(now), horizon.average_price()) {
            (Some(price), Some(avg)) => Self::from_price(price, avg),
            _ => PriceStatus::Unknown,
        }
    }

    pub fn from_price(price: f64, average: f64) -> Self {
        if price < average * VERY_CHEAP_RATIO {
            PriceStatus::VeryCheap
        } else if price < average {
            PriceStatus::Cheap
        } else {
            PriceStatus::Expensive
        }
    }
}
