//! Typed tool arguments with lenient coercion.
//!
//! The model produces tool arguments, so their shape is a suggestion rather
//! than a contract: numbers arrive as strings, strings as numbers, keys in
//! camelCase or snake_case. Each tool declares a struct here and every field
//! goes through a coercing deserializer that never fails; a value that
//! cannot be coerced becomes `None`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Decodes `value` into `T`, falling back to `T::default()` when the
/// arguments are not an object at all.
pub fn parse_args<T>(tool: &str, value: Value) -> T
where
    T: DeserializeOwned + Default,
{
    let value = match value {
        Value::Null => return T::default(),
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::Null),
        other => other,
    };
    match serde_json::from_value(value) {
        Ok(args) => args,
        Err(e) => {
            tracing::warn!(tool, "tool arguments are not an object, using defaults: {}", e);
            T::default()
        }
    }
}

pub fn coerce_string(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

pub fn coerce_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
            .and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => {
            let s = s.trim().to_lowercase();
            if let Ok(n) = s.parse::<u32>() {
                return Some(n);
            }
            if let Ok(f) = s.parse::<f64>() {
                return (f >= 0.0 && f <= u32::MAX as f64).then(|| f.round() as u32);
            }
            number_word(&s)
        }
        _ => None,
    }
}

/// Spoken quantities the model sometimes passes through verbatim.
fn number_word(word: &str) -> Option<u32> {
    const WORDS: &[(&str, u32)] = &[
        ("one", 1),
        ("a", 1),
        ("an", 1),
        ("single", 1),
        ("two", 2),
        ("pair", 2),
        ("a pair", 2),
        ("three", 3),
        ("four", 4),
        ("five", 5),
        ("six", 6),
        ("seven", 7),
        ("eight", 8),
        ("nine", 9),
        ("ten", 10),
        ("uno", 1),
        ("una", 1),
        ("dos", 2),
        ("tres", 3),
        ("cuatro", 4),
        ("cinco", 5),
        ("seis", 6),
        ("siete", 7),
        ("ocho", 8),
        ("nueve", 9),
        ("diez", 10),
    ];
    WORDS.iter().find(|(w, _)| *w == word).map(|(_, n)| *n)
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(coerce_string(&Value::deserialize(d)?))
}

fn lenient_u32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    Ok(coerce_u32(&Value::deserialize(d)?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NextEventsArgs {
    #[serde(deserialize_with = "lenient_u32", alias = "count", alias = "max")]
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TicketPricesArgs {
    #[serde(
        deserialize_with = "lenient_string",
        alias = "event_id",
        alias = "eventId",
        alias = "event_name",
        alias = "eventName"
    )]
    pub event: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PurchaseArgs {
    #[serde(
        deserialize_with = "lenient_string",
        alias = "event_id",
        alias = "eventId",
        alias = "event_name",
        alias = "eventName"
    )]
    pub event: Option<String>,
    #[serde(
        deserialize_with = "lenient_string",
        alias = "ticket_type",
        alias = "ticketType",
        alias = "tier_name"
    )]
    pub tier: Option<String>,
    #[serde(
        deserialize_with = "lenient_u32",
        alias = "qty",
        alias = "count",
        alias = "tickets"
    )]
    pub quantity: Option<u32>,
    #[serde(
        deserialize_with = "lenient_string",
        alias = "customer_name",
        alias = "customerName"
    )]
    pub name: Option<String>,
    #[serde(
        deserialize_with = "lenient_string",
        alias = "customer_phone",
        alias = "customerPhone",
        alias = "phone_number"
    )]
    pub phone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct InquiryArgs {
    #[serde(
        deserialize_with = "lenient_string",
        alias = "caller_name",
        alias = "callerName"
    )]
    pub name: Option<String>,
    #[serde(
        deserialize_with = "lenient_string",
        alias = "caller_phone",
        alias = "callerPhone",
        alias = "phone_number"
    )]
    pub phone: Option<String>,
    #[serde(deserialize_with = "lenient_string", alias = "subject")]
    pub topic: Option<String>,
    #[serde(
        deserialize_with = "lenient_string",
        alias = "message",
        alias = "notes"
    )]
    pub details: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MessageArgs {
    #[serde(deserialize_with = "lenient_string", alias = "to", alias = "for")]
    pub recipient: Option<String>,
    #[serde(
        deserialize_with = "lenient_string",
        alias = "caller_name",
        alias = "callerName"
    )]
    pub name: Option<String>,
    #[serde(
        deserialize_with = "lenient_string",
        alias = "caller_phone",
        alias = "callerPhone",
        alias = "phone_number"
    )]
    pub phone: Option<String>,
    #[serde(deserialize_with = "lenient_string", alias = "body", alias = "text")]
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct QuestionArgs {
    #[serde(deserialize_with = "lenient_string", alias = "query", alias = "q")]
    pub question: Option<String>,
}

/// Shared by `transfer_to_human` and `record_voicemail`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HandoffArgs {
    #[serde(deserialize_with = "lenient_string")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quantity_accepts_numbers_strings_and_words() {
        for (raw, expected) in [
            (json!({"quantity": 2}), Some(2)),
            (json!({"quantity": "3"}), Some(3)),
            (json!({"qty": 2.0}), Some(2)),
            (json!({"quantity": " four "}), Some(4)),
            (json!({"quantity": "dos"}), Some(2)),
            (json!({"quantity": -1}), None),
            (json!({"quantity": "lots"}), None),
            (json!({"quantity": [1]}), None),
        ] {
            let args: PurchaseArgs = parse_args("purchase_tickets", raw.clone());
            assert_eq!(args.quantity, expected, "input {raw}");
        }
    }

    #[test]
    fn camel_case_keys_and_numeric_strings() {
        let args: PurchaseArgs = parse_args(
            "purchase_tickets",
            json!({"eventId": "evt-1", "ticketType": "VIP", "customerPhone": 5551234}),
        );
        assert_eq!(args.event.as_deref(), Some("evt-1"));
        assert_eq!(args.tier.as_deref(), Some("VIP"));
        assert_eq!(args.phone.as_deref(), Some("5551234"));
    }

    #[test]
    fn one_bad_field_does_not_discard_the_rest() {
        let args: InquiryArgs = parse_args(
            "capture_inquiry",
            json!({"name": {"first": "Ada"}, "topic": "parking", "extra": true}),
        );
        assert!(args.name.is_none());
        assert_eq!(args.topic.as_deref(), Some("parking"));
    }

    #[test]
    fn blank_strings_become_none() {
        let args: QuestionArgs = parse_args("answer_question", json!({"question": "   "}));
        assert!(args.question.is_none());
    }

    #[test]
    fn non_object_arguments_fall_back_to_defaults() {
        let args: MessageArgs = parse_args("take_message", json!([1, 2, 3]));
        assert!(args.message.is_none());
        let args: MessageArgs = parse_args("take_message", Value::Null);
        assert!(args.recipient.is_none());
    }

    #[test]
    fn stringified_json_objects_are_unwrapped() {
        let args: QuestionArgs =
            parse_args("answer_question", json!(r#"{"question":"when is the next show"}"#));
        assert_eq!(args.question.as_deref(), Some("when is the next show"));
    }
}
