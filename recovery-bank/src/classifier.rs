//! Stop classification and category limits
//!
//! Categories are inferred from the stop name by keyword. The first
//! category whose vocabulary matches wins, checked in this order:
//! terminal, school, hospital, mall, major stop. Anything else is regular.

use crate::types::{RecoveryLimits, StopType};
use rust_decimal::Decimal;

/// Keyword vocabulary per category, in match order
const VOCABULARY: &[(StopType, &[&str])] = &[
    (StopType::Terminal, &["terminal", "terminus", "station"]),
    (StopType::School, &["school", "collegiate", "secondary", "elementary"]),
    (StopType::Hospital, &["hospital", "medical", "clinic"]),
    (StopType::Mall, &["mall", "centre", "center", "plaza"]),
    (StopType::MajorStop, &["college", "university", "campus"]),
];

/// Infer a stop's category from its name (case-insensitive)
pub fn infer_stop_type(name: &str) -> StopType {
    let lowered = name.to_lowercase();

    VOCABULARY
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(stop_type, _)| *stop_type)
        .unwrap_or(StopType::Regular)
}

/// Fixed recovery limits for a category
///
/// Schools are the strictest and terminals the most generous.
pub fn recovery_limits(stop_type: StopType) -> RecoveryLimits {
    let (min, max, credit) = match stop_type {
        StopType::Terminal => (2, 15, 8),
        StopType::Mall => (1, 10, 6),
        StopType::MajorStop => (1, 8, 4),
        StopType::Hospital => (2, 6, 2),
        StopType::School => (1, 4, 1),
        StopType::Regular => (0, 6, 3),
    };

    RecoveryLimits {
        min_recovery_time: Decimal::from(min),
        max_recovery_time: Decimal::from(max),
        max_credit: Decimal::from(credit),
    }
}
