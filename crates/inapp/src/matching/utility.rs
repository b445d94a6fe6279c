//! Typed value comparisons used by trigger attribute evaluation.
//!
//! The first argument is always the value carried by the logged event, the
//! last one the value declared by the trigger. Operators that make no sense
//! for a type evaluate to `false`.

use campaign_core::types::AttributeOperator;
use regex::Regex;

/// Two times closer than this are considered equal.
pub const TIME_TOLERANCE_MS: i64 = 1_000;

pub fn compare_strings(event_value: &str, operator: AttributeOperator, trigger_value: &str) -> bool {
    match operator {
        AttributeOperator::Equals => event_value.to_lowercase() == trigger_value.to_lowercase(),
        AttributeOperator::IsNotEqual => {
            event_value.to_lowercase() != trigger_value.to_lowercase()
        }
        AttributeOperator::IsBlank => event_value.trim().is_empty(),
        AttributeOperator::IsNotBlank => !event_value.trim().is_empty(),
        AttributeOperator::MatchesRegex => {
            regex_match(event_value, trigger_value).unwrap_or(false)
        }
        AttributeOperator::DoesNotMatchRegex => regex_match(event_value, trigger_value)
            .map(|matched| !matched)
            .unwrap_or(false),
        _ => false,
    }
}

pub fn compare_integers(event_value: i64, operator: AttributeOperator, trigger_value: i64) -> bool {
    match operator {
        AttributeOperator::Equals => event_value == trigger_value,
        AttributeOperator::IsNotEqual => event_value != trigger_value,
        AttributeOperator::GreaterThan => event_value > trigger_value,
        AttributeOperator::LessThan => event_value < trigger_value,
        _ => false,
    }
}

pub fn compare_doubles(event_value: f64, operator: AttributeOperator, trigger_value: f64) -> bool {
    if event_value.is_nan() || trigger_value.is_nan() {
        return false;
    }
    let equal = (event_value - trigger_value).abs() <= f64::EPSILON;
    match operator {
        AttributeOperator::Equals => equal,
        AttributeOperator::IsNotEqual => !equal,
        AttributeOperator::GreaterThan => !equal && event_value > trigger_value,
        AttributeOperator::LessThan => !equal && event_value < trigger_value,
        _ => false,
    }
}

pub fn compare_booleans(event_value: bool, operator: AttributeOperator, trigger_value: bool) -> bool {
    match operator {
        AttributeOperator::Equals => event_value == trigger_value,
        AttributeOperator::IsNotEqual => event_value != trigger_value,
        _ => false,
    }
}

/// Millisecond timestamps compare within [`TIME_TOLERANCE_MS`]: a difference
/// has to exceed the tolerance before one side counts as greater or less.
pub fn compare_times(event_millis: i64, operator: AttributeOperator, trigger_millis: i64) -> bool {
    let difference = event_millis.saturating_sub(trigger_millis);
    match operator {
        AttributeOperator::Equals => difference.saturating_abs() <= TIME_TOLERANCE_MS,
        AttributeOperator::IsNotEqual => difference.saturating_abs() > TIME_TOLERANCE_MS,
        AttributeOperator::GreaterThan => difference > TIME_TOLERANCE_MS,
        AttributeOperator::LessThan => difference < -TIME_TOLERANCE_MS,
        _ => false,
    }
}

/// Lenient boolean parsing for trigger values sent as strings.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

// Invalid patterns never match, in either direction.
fn regex_match(value: &str, pattern: &str) -> Option<bool> {
    Regex::new(pattern).ok().map(|re| re.is_match(value))
}
