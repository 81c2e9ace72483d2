//! Deterministic ticket ordering for the `/sort-tickets` endpoint.
//!
//! Tickets are ordered by `(priority, timestamp, id)` ascending, so a lower
//! priority number sorts first and ties always resolve the same way.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult, FieldError};

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];
const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M%:z", "%Y-%m-%d %H:%M%:z"];

/// One submitted ticket before validation. Any field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketInput {
    pub id: Option<i64>,
    pub priority: Option<i64>,
    pub timestamp: Option<String>,
}

/// A validated ticket projection carrying only the ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketSummary {
    pub id: i64,
    pub priority: i64,
    pub timestamp: DateTime<Utc>,
}

impl TicketSummary {
    fn key(&self) -> (i64, DateTime<Utc>, i64) {
        (self.priority, self.timestamp, self.id)
    }
}

/// Parses an ISO-8601 timestamp. Values without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    // Minutes-only values with an offset, `Z` spelled as `+00:00`.
    let with_offset = match raw.strip_suffix(['Z', 'z']) {
        Some(rest) => format!("{rest}+00:00"),
        None => raw.to_string(),
    };
    if let Some(parsed) = OFFSET_FORMATS
        .iter()
        .find_map(|format| DateTime::parse_from_str(&with_offset, format).ok())
    {
        return Some(parsed.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

fn check(index: usize, input: &TicketInput, mut invalid: Vec<&'static str>) -> Result<TicketSummary, FieldError> {
    let mut missing = Vec::new();
    if input.id.is_none() && !invalid.contains(&"id") {
        missing.push("id");
    }
    if input.priority.is_none() && !invalid.contains(&"priority") {
        missing.push("priority");
    }
    let timestamp = match input.timestamp.as_deref() {
        Some(raw) => {
            let parsed = parse_timestamp(raw);
            if parsed.is_none() {
                invalid.push("timestamp");
            }
            parsed
        }
        None => {
            if !invalid.contains(&"timestamp") {
                missing.push("timestamp");
            }
            None
        }
    };

    match (input.id, input.priority, timestamp) {
        (Some(id), Some(priority), Some(timestamp)) if invalid.is_empty() => Ok(TicketSummary {
            id,
            priority,
            timestamp,
        }),
        _ => Err(FieldError {
            index,
            missing,
            invalid,
        }),
    }
}

fn collect(checked: Vec<Result<TicketSummary, FieldError>>) -> AppResult<Vec<TicketSummary>> {
    let mut summaries = Vec::with_capacity(checked.len());
    let mut details = Vec::new();
    for result in checked {
        match result {
            Ok(summary) => summaries.push(summary),
            Err(detail) => details.push(detail),
        }
    }
    if details.is_empty() {
        return Ok(summaries);
    }
    Err(AppError::Validation {
        message: format!(
            "{} ticket(s) rejected: each ticket must contain 'priority', 'timestamp', and 'id'",
            details.len()
        ),
        details,
    })
}

/// Checks every item and reports all problems at once; no partial result.
pub fn validate(items: &[TicketInput]) -> AppResult<Vec<TicketSummary>> {
    collect(
        items
            .iter()
            .enumerate()
            .map(|(index, item)| check(index, item, Vec::new()))
            .collect(),
    )
}

pub fn sorted_ids(tickets: &[TicketSummary]) -> Vec<i64> {
    let mut ordered = tickets.to_vec();
    ordered.sort_by_key(TicketSummary::key);
    ordered.into_iter().map(|ticket| ticket.id).collect()
}

pub fn sort_tickets(items: &[TicketInput]) -> AppResult<Vec<i64>> {
    validate(items).map(|tickets| sorted_ids(&tickets))
}

/// Reads one field: `Ok(None)` when absent or null, `Err(())` on a wrong type.
fn field<T>(object: &Map<String, Value>, key: &str, read: impl Fn(&Value) -> Option<T>) -> Result<Option<T>, ()> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => read(value).map(Some).ok_or(()),
    }
}

fn input_from_json(item: &Value) -> (TicketInput, Vec<&'static str>) {
    let Some(object) = item.as_object() else {
        return (TicketInput::default(), vec!["id", "priority", "timestamp"]);
    };
    let mut invalid = Vec::new();
    let mut read = |key: &'static str, value: Result<Option<_>, ()>| {
        value.unwrap_or_else(|_| {
            invalid.push(key);
            None
        })
    };
    let id = read("id", field(object, "id", Value::as_i64));
    let priority = read("priority", field(object, "priority", Value::as_i64));
    let timestamp = field(object, "timestamp", |v| v.as_str().map(str::to_string)).unwrap_or_else(|_| {
        invalid.push("timestamp");
        None
    });
    (
        TicketInput {
            id,
            priority,
            timestamp,
        },
        invalid,
    )
}

/// Parses and validates a JSON request body, which must be a list of tickets.
pub fn parse_payload(body: &str) -> AppResult<Vec<TicketSummary>> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| AppError::MalformedPayload(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(AppError::MalformedPayload(
            "expected a list of tickets".to_string(),
        ));
    };
    collect(
        items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let (input, invalid) = input_from_json(item);
                check(index, &input, invalid)
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn input(id: i64, priority: i64, timestamp: &str) -> TicketInput {
        TicketInput {
            id: Some(id),
            priority: Some(priority),
            timestamp: Some(timestamp.to_string()),
        }
    }

    #[test]
    fn empty_input_sorts_to_empty_output() {
        assert_eq!(sort_tickets(&[]).unwrap(), Vec::<i64>::new());
    }

    #[test]
    fn single_item_returns_its_id() {
        let items = [input(9, 3, "2025-08-10T10:00:00Z")];
        assert_eq!(sort_tickets(&items).unwrap(), vec![9]);
    }

    #[test]
    fn orders_by_priority_then_timestamp_then_id() {
        let items = [
            input(4, 2, "2025-08-10T10:00:00Z"),
            input(3, 1, "2025-08-11T10:00:00Z"),
            input(2, 1, "2025-08-10T10:00:00Z"),
            input(1, 1, "2025-08-11T10:00:00Z"),
        ];
        assert_eq!(sort_tickets(&items).unwrap(), vec![2, 1, 3, 4]);
    }

    #[test]
    fn output_is_independent_of_input_order() {
        let mut items = vec![
            input(5, 1, "2025-01-01T00:00:00Z"),
            input(6, 1, "2025-01-01T00:00:00Z"),
            input(7, 0, "2025-02-01T00:00:00Z"),
        ];
        let first = sort_tickets(&items).unwrap();
        items.reverse();
        assert_eq!(sort_tickets(&items).unwrap(), first);
        assert_eq!(first, vec![7, 5, 6]);
    }

    #[test]
    fn sorting_sorted_input_is_stable() {
        let items = [
            input(1, 1, "2025-01-01T00:00:00Z"),
            input(2, 1, "2025-01-02T00:00:00Z"),
            input(3, 2, "2025-01-01T00:00:00Z"),
        ];
        let ids = sort_tickets(&items).unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn offsets_are_compared_as_instants() {
        // 10:00+02:00 is 08:00Z, which is earlier than 09:00Z.
        let items = [
            input(1, 1, "2025-08-10T09:00:00Z"),
            input(2, 1, "2025-08-10T10:00:00+02:00"),
        ];
        assert_eq!(sort_tickets(&items).unwrap(), vec![2, 1]);
    }

    #[test]
    fn missing_fields_fail_with_every_problem_listed() {
        let items = [
            TicketInput {
                id: Some(1),
                priority: None,
                timestamp: Some("2025-08-10T09:00:00".into()),
            },
            input(2, 1, "2025-08-10T09:00:00"),
            TicketInput::default(),
        ];
        let err = sort_tickets(&items).unwrap_err();
        let AppError::Validation { details, .. } = err else {
            panic!("expected a validation error");
        };
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].index, 0);
        assert_eq!(details[0].missing, vec!["priority"]);
        assert_eq!(details[1].index, 2);
        assert_eq!(details[1].missing, vec!["id", "priority", "timestamp"]);
    }

    #[test]
    fn minute_precision_timestamps_are_accepted() {
        let expected = Utc.with_ymd_and_hms(2025, 8, 10, 9, 0, 0).unwrap();
        for raw in [
            "2025-08-10T09:00",
            "2025-08-10 09:00",
            "2025-08-10T09:00Z",
            "2025-08-10T09:00+00:00",
        ] {
            assert_eq!(parse_timestamp(raw), Some(expected), "{raw}");
        }
        assert_eq!(
            parse_timestamp("2025-08-10T11:00+02:00"),
            Some(expected)
        );
        let items = [input(1, 1, "2025-08-10T09:30"), input(2, 1, "2025-08-10T09:00Z")];
        assert_eq!(sort_tickets(&items).unwrap(), vec![2, 1]);
    }

    #[test]
    fn unparseable_timestamp_is_invalid() {
        let err = sort_tickets(&[input(1, 1, "yesterday")]).unwrap_err();
        let AppError::Validation { details, .. } = err else {
            panic!("expected a validation error");
        };
        assert_eq!(details[0].invalid, vec!["timestamp"]);
        assert!(details[0].missing.is_empty());
    }

    #[test]
    fn payload_must_be_a_list() {
        assert!(matches!(
            parse_payload(r#"{"id": 1}"#),
            Err(AppError::MalformedPayload(_))
        ));
        assert!(matches!(parse_payload("not json"), Err(AppError::MalformedPayload(_))));
    }

    #[test]
    fn payload_reports_wrong_types_and_missing_keys() {
        let body = r#"[
            {"id": "one", "priority": 1, "timestamp": "2025-08-10T09:00:00"},
            {"id": 2, "timestamp": "2025-08-10T09:00:00"},
            7
        ]"#;
        let AppError::Validation { details, .. } = parse_payload(body).unwrap_err() else {
            panic!("expected a validation error");
        };
        assert_eq!(details[0].invalid, vec!["id"]);
        assert!(details[0].missing.is_empty());
        assert_eq!(details[1].missing, vec!["priority"]);
        assert_eq!(details[2].invalid, vec!["id", "priority", "timestamp"]);
    }

    #[test]
    fn payload_parses_valid_tickets() {
        let body = r#"[
            {"id": 10, "priority": 2, "timestamp": "2025-08-10T09:00:00.123456"},
            {"id": 11, "priority": 1, "timestamp": "2025-08-10T09:00:00+00:00"}
        ]"#;
        let tickets = parse_payload(body).unwrap();
        assert_eq!(sorted_ids(&tickets), vec![11, 10]);
    }
}
