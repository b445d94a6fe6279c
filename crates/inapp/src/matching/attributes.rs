use campaign_core::types::{AttributeValue, Event, Trigger, TriggerAttribute};
use tracing::trace;

use super::utility;

/// Decides whether a single event satisfies every attribute predicate of a
/// trigger.
#[derive(Debug, Clone, Default)]
pub struct TriggerAttributesValidator;

impl TriggerAttributesValidator {
    pub fn new() -> Self {
        Self
    }

    /// True iff every trigger attribute has a same-named, same-typed
    /// attribute on the event whose value satisfies the operator. A trigger
    /// without attributes is satisfied by any event.
    pub fn is_trigger_satisfied(&self, trigger: &Trigger, event: &Event) -> bool {
        trigger
            .attributes
            .iter()
            .all(|attribute| self.is_attribute_satisfied(attribute, event))
    }

    fn is_attribute_satisfied(&self, attribute: &TriggerAttribute, event: &Event) -> bool {
        let Some(value) = event.attribute(&attribute.name) else {
            trace!(attribute = %attribute.name, "Event is missing trigger attribute");
            return false;
        };
        if value.attribute_type() != attribute.attribute_type {
            trace!(
                attribute = %attribute.name,
                expected = ?attribute.attribute_type,
                actual = ?value.attribute_type(),
                "Attribute type mismatch"
            );
            return false;
        }

        let expected = attribute.value.trim();
        let operator = attribute.operator;
        match value {
            AttributeValue::String(actual) => {
                utility::compare_strings(actual, operator, &attribute.value)
            }
            AttributeValue::Integer(actual) => expected
                .parse::<i64>()
                .map(|expected| utility::compare_integers(*actual, operator, expected))
                .unwrap_or(false),
            AttributeValue::Double(actual) => expected
                .parse::<f64>()
                .map(|expected| utility::compare_doubles(*actual, operator, expected))
                .unwrap_or(false),
            AttributeValue::Boolean(actual) => utility::parse_bool(expected)
                .map(|expected| utility::compare_booleans(*actual, operator, expected))
                .unwrap_or(false),
            AttributeValue::TimeInMilliseconds(actual) => expected
                .parse::<i64>()
                .map(|expected| utility::compare_times(*actual, operator, expected))
                .unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::types::{AttributeOperator, AttributeType, EventType};

    fn attribute(
        name: &str,
        attribute_type: AttributeType,
        operator: AttributeOperator,
        value: &str,
    ) -> TriggerAttribute {
        TriggerAttribute {
            name: name.to_string(),
            attribute_type,
            operator,
            value: value.to_string(),
        }
    }

    #[test]
    fn test_all_attributes_must_hold() {
        let trigger = Trigger::new(EventType::Custom, "purchase")
            .with_attribute(attribute(
                "Tier",
                AttributeType::String,
                AttributeOperator::Equals,
                "gold",
            ))
            .with_attribute(attribute(
                "items",
                AttributeType::Integer,
                AttributeOperator::GreaterThan,
                "2",
            ));
        let validator = TriggerAttributesValidator::new();

        let event = Event::custom("purchase")
            .with_attribute("tier", AttributeValue::String("GOLD".into()))
            .with_attribute("items", AttributeValue::Integer(3));
        assert!(validator.is_trigger_satisfied(&trigger, &event));

        let event = Event::custom("purchase")
            .with_attribute("tier", AttributeValue::String("gold".into()))
            .with_attribute("items", AttributeValue::Integer(2));
        assert!(!validator.is_trigger_satisfied(&trigger, &event));
    }

    #[test]
    fn test_type_mismatch_is_false() {
        let trigger = Trigger::new(EventType::Custom, "e").with_attribute(attribute(
            "count",
            AttributeType::Integer,
            AttributeOperator::Equals,
            "3",
        ));
        let event = Event::custom("e").with_attribute("count", AttributeValue::Double(3.0));
        assert!(!TriggerAttributesValidator::new().is_trigger_satisfied(&trigger, &event));
    }

    #[test]
    fn test_unparseable_trigger_value_is_false() {
        let trigger = Trigger::new(EventType::Custom, "e").with_attribute(attribute(
            "flag",
            AttributeType::Boolean,
            AttributeOperator::Equals,
            "maybe",
        ));
        let event = Event::custom("e").with_attribute("flag", AttributeValue::Boolean(true));
        assert!(!TriggerAttributesValidator::new().is_trigger_satisfied(&trigger, &event));
    }

    #[test]
    fn test_time_attribute_tolerance() {
        let trigger = Trigger::new(EventType::Custom, "e").with_attribute(attribute(
            "at",
            AttributeType::TimeInMilliseconds,
            AttributeOperator::Equals,
            "1000",
        ));
        let validator = TriggerAttributesValidator::new();
        let within =
            Event::custom("e").with_attribute("at", AttributeValue::TimeInMilliseconds(1_999));
        let outside =
            Event::custom("e").with_attribute("at", AttributeValue::TimeInMilliseconds(2_001));
        assert!(validator.is_trigger_satisfied(&trigger, &within));
        assert!(!validator.is_trigger_satisfied(&trigger, &outside));
    }

    #[test]
    fn test_missing_attribute_is_false() {
        let trigger = Trigger::new(EventType::Custom, "e").with_attribute(attribute(
            "name",
            AttributeType::String,
            AttributeOperator::IsBlank,
            "",
        ));
        assert!(!TriggerAttributesValidator::new().is_trigger_satisfied(&trigger, &Event::custom("e")));
    }
}
