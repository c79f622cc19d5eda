//! Parsing of the model's `do(...)` / `finish(...)` action calls.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::device::Point;

/// Action parsing errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    #[error("Failed to parse action: {0}")]
    ParseError(String),
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),
    #[error("Invalid {name}: {reason}")]
    InvalidArgument { name: String, reason: String },
}

/// A structured model decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action")]
pub enum Action {
    Launch {
        app: String,
    },
    Tap {
        point: Point,
        /// Present when the tap is sensitive and needs confirmation.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Type {
        text: String,
    },
    Swipe {
        start: Point,
        end: Point,
    },
    #[serde(rename = "Double Tap")]
    DoubleTap {
        point: Point,
    },
    #[serde(rename = "Long Press")]
    LongPress {
        point: Point,
    },
    Wait {
        seconds: f64,
    },
    Back,
    Home,
    #[serde(rename = "Take_over")]
    TakeOver {
        message: String,
    },
    Note {
        message: String,
    },
    #[serde(rename = "Call_API")]
    CallApi {
        instruction: String,
    },
    Interact,
    #[serde(rename = "finish")]
    Finish {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl Action {
    pub fn finish(message: impl Into<String>) -> Self {
        Action::Finish {
            message: Some(message.into()),
        }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, Action::Finish { .. })
    }

    /// Name the model uses for this action.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Launch { .. } => "Launch",
            Action::Tap { .. } => "Tap",
            Action::Type { .. } => "Type",
            Action::Swipe { .. } => "Swipe",
            Action::DoubleTap { .. } => "Double Tap",
            Action::LongPress { .. } => "Long Press",
            Action::Wait { .. } => "Wait",
            Action::Back => "Back",
            Action::Home => "Home",
            Action::TakeOver { .. } => "Take_over",
            Action::Note { .. } => "Note",
            Action::CallApi { .. } => "Call_API",
            Action::Interact => "Interact",
            Action::Finish { .. } => "finish",
        }
    }

    /// Parse the model's text, or fall back to finishing with the raw text.
    pub fn parse_or_finish(text: &str) -> Self {
        parse_action(text).unwrap_or_else(|e| {
            tracing::warn!("{}; finishing with raw output", e);
            Action::finish(text.trim())
        })
    }
}

/// Parse an action call emitted by the model.
///
/// Accepts `do(action="…", key=value, …)` and `finish(message="…")`. Values
/// may be quoted strings, integers, floats or lists.
pub fn parse_action(response: &str) -> Result<Action, ActionError> {
    let response = response.trim();

    if response.starts_with("do(") {
        let fields = parse_do_fields(response)?;
        return action_from_fields(fields);
    }

    if response.starts_with("finish(") {
        return parse_finish_action(response);
    }

    Err(ActionError::ParseError(response.to_string()))
}

/// Split the body of `do(...)` into key/value pairs.
fn parse_do_fields(response: &str) -> Result<Map<String, Value>, ActionError> {
    let content = response
        .strip_prefix("do(")
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| ActionError::ParseError(format!("Invalid do() format: {}", response)))?;

    let mut fields = Map::new();
    let mut key = String::new();
    let mut value = String::new();
    let mut quoted = false;
    let mut in_string = false;
    let mut escaped = false;
    let mut list_depth = 0;
    let mut string_char = '"';
    let mut parsing_key = true;

    let mut commit = |key: &mut String, value: &mut String, quoted: &mut bool| {
        let name = key.trim().to_string();
        if !name.is_empty() {
            let parsed = if *quoted {
                json!(value.as_str())
            } else {
                parse_value(value.trim())
            };
            fields.insert(name, parsed);
        }
        key.clear();
        value.clear();
        *quoted = false;
    };

    for c in content.chars() {
        if in_string {
            if escaped {
                value.push(match c {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == string_char {
                in_string = false;
            } else {
                value.push(c);
            }
            continue;
        }

        if list_depth > 0 {
            value.push(c);
            match c {
                '[' => list_depth += 1,
                ']' => list_depth -= 1,
                _ => {}
            }
            continue;
        }

        match c {
            '"' | '\'' => {
                in_string = true;
                quoted = true;
                string_char = c;
            }
            '[' => {
                list_depth = 1;
                value.push(c);
            }
            '=' if parsing_key => parsing_key = false,
            ',' => {
                commit(&mut key, &mut value, &mut quoted);
                parsing_key = true;
            }
            _ if c.is_whitespace() => {}
            _ => {
                if parsing_key {
                    key.push(c);
                } else {
                    value.push(c);
                }
            }
        }
    }

    if in_string || list_depth > 0 {
        return Err(ActionError::ParseError(format!("Unterminated value in: {}", response)));
    }

    commit(&mut key, &mut value, &mut quoted);
    Ok(fields)
}

fn parse_finish_action(response: &str) -> Result<Action, ActionError> {
    let content = response
        .strip_prefix("finish(")
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| ActionError::ParseError(format!("Invalid finish() format: {}", response)))?
        .trim();

    let Some(raw) = content.strip_prefix("message=") else {
        return Ok(Action::Finish { message: None });
    };

    let raw = raw.trim();
    let message = ['"', '\'']
        .iter()
        .find_map(|q| raw.strip_prefix(*q).and_then(|s| s.strip_suffix(*q)))
        .unwrap_or(raw);

    Ok(Action::finish(message))
}

/// Parse an unquoted value: list, integer, float or bare word.
fn parse_value(value_str: &str) -> Value {
    let trimmed = value_str.trim();

    if let Some(inner) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        let items: Vec<Value> = inner
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(parse_value)
            .collect();
        return json!(items);
    }

    if let Ok(n) = trimmed.parse::<i64>() {
        return json!(n);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return json!(f);
    }

    json!(trimmed.trim_matches(|c| c == '"' || c == '\''))
}

fn action_from_fields(fields: Map<String, Value>) -> Result<Action, ActionError> {
    let name = fields
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| ActionError::MissingParameter("action".into()))?;

    let text = |key: &str| fields.get(key).and_then(Value::as_str).map(str::to_string);

    let action = match name {
        "Launch" => Action::Launch {
            app: text("app").ok_or_else(|| ActionError::MissingParameter("app".into()))?,
        },
        "Tap" => Action::Tap {
            point: point(&fields, "element")?,
            message: text("message"),
        },
        "Type" | "Type_Name" => Action::Type {
            text: text("text").unwrap_or_default(),
        },
        "Swipe" => Action::Swipe {
            start: point(&fields, "start")?,
            end: point(&fields, "end")?,
        },
        "Double Tap" => Action::DoubleTap {
            point: point(&fields, "element")?,
        },
        "Long Press" => Action::LongPress {
            point: point(&fields, "element")?,
        },
        "Wait" => Action::Wait {
            seconds: wait_seconds(fields.get("duration")),
        },
        "Back" => Action::Back,
        "Home" => Action::Home,
        "Take_over" => Action::TakeOver {
            message: text("message").unwrap_or_else(|| "User intervention required".into()),
        },
        "Note" => Action::Note {
            message: text("message").unwrap_or_default(),
        },
        "Call_API" => Action::CallApi {
            instruction: text("instruction").unwrap_or_default(),
        },
        "Interact" => Action::Interact,
        other => return Err(ActionError::UnknownAction(other.to_string())),
    };

    Ok(action)
}

/// Coordinates must be a two-element integer list.
fn point(fields: &Map<String, Value>, key: &str) -> Result<Point, ActionError> {
    let invalid = |reason: &str| ActionError::InvalidArgument {
        name: key.to_string(),
        reason: reason.to_string(),
    };

    let items = fields
        .get(key)
        .ok_or_else(|| ActionError::MissingParameter(key.to_string()))?
        .as_array()
        .ok_or_else(|| invalid("expected a [x, y] list"))?;

    if items.len() != 2 {
        return Err(invalid(&format!("expected 2 coordinates, got {}", items.len())));
    }

    let coord = |v: &Value| {
        v.as_i64()
            .or_else(|| v.as_f64().map(|f| f.round() as i64))
            .ok_or_else(|| invalid("coordinates must be numbers"))
    };

    Ok(Point::new(coord(&items[0])?, coord(&items[1])?))
}

static SECONDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid regex"));

/// `"2 seconds"`, `"1.5"` or a bare number; defaults to one second.
fn wait_seconds(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(1.0),
        Some(Value::String(s)) => SECONDS
            .find(s)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(1.0),
        _ => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tap() {
        let action = parse_action(r#"do(action="Tap", element=[100, 200])"#).unwrap();
        assert_eq!(
            action,
            Action::Tap {
                point: Point::new(100, 200),
                message: None
            }
        );
    }

    #[test]
    fn test_parse_sensitive_tap() {
        let action = parse_action(r#"do(action="Tap", element=[500, 800], message="Confirm payment")"#).unwrap();
        assert_eq!(
            action,
            Action::Tap {
                point: Point::new(500, 800),
                message: Some("Confirm payment".into())
            }
        );
    }

    #[test]
    fn test_parse_swipe_and_variants() {
        assert_eq!(
            parse_action(r#"do(action="Swipe", start=[500, 800], end=[500, 200])"#).unwrap(),
            Action::Swipe {
                start: Point::new(500, 800),
                end: Point::new(500, 200)
            }
        );
        assert_eq!(
            parse_action(r#"do(action="Double Tap", element=[1, 2])"#).unwrap(),
            Action::DoubleTap { point: Point::new(1, 2) }
        );
        assert_eq!(parse_action(r#"do(action="Back")"#).unwrap(), Action::Back);
        assert_eq!(parse_action(r#"do(action="Home")"#).unwrap(), Action::Home);
    }

    #[test]
    fn test_parse_type_keeps_commas_and_escapes() {
        let action = parse_action(r#"do(action="Type", text="hello, world\nbye")"#).unwrap();
        assert_eq!(
            action,
            Action::Type {
                text: "hello, world\nbye".into()
            }
        );
    }

    #[test]
    fn test_parse_wait_durations() {
        assert_eq!(
            parse_action(r#"do(action="Wait", duration="2 seconds")"#).unwrap(),
            Action::Wait { seconds: 2.0 }
        );
        assert_eq!(
            parse_action(r#"do(action="Wait", duration=1.5)"#).unwrap(),
            Action::Wait { seconds: 1.5 }
        );
        assert_eq!(parse_action(r#"do(action="Wait")"#).unwrap(), Action::Wait { seconds: 1.0 });
    }

    #[test]
    fn test_parse_finish() {
        assert_eq!(
            parse_action(r#"finish(message="Task completed")"#).unwrap(),
            Action::finish("Task completed")
        );
        assert_eq!(
            parse_action(r#"finish(message="He said "hi", then left")"#).unwrap(),
            Action::finish(r#"He said "hi", then left"#)
        );
        assert_eq!(parse_action("finish()").unwrap(), Action::Finish { message: None });
    }

    #[test]
    fn test_coordinate_shape_is_validated() {
        let err = parse_action(r#"do(action="Tap", element=[100])"#).unwrap_err();
        assert!(matches!(err, ActionError::InvalidArgument { .. }));

        let err = parse_action(r#"do(action="Tap", element="middle")"#).unwrap_err();
        assert!(matches!(err, ActionError::InvalidArgument { .. }));

        let err = parse_action(r#"do(action="Tap")"#).unwrap_err();
        assert_eq!(err, ActionError::MissingParameter("element".into()));
    }

    #[test]
    fn test_unknown_and_garbage() {
        assert_eq!(
            parse_action(r#"do(action="Fly")"#).unwrap_err(),
            ActionError::UnknownAction("Fly".into())
        );
        assert!(matches!(parse_action("I think I am done").unwrap_err(), ActionError::ParseError(_)));
        assert!(matches!(
            parse_action(r#"do(action="Type", text="open)"#).unwrap_err(),
            ActionError::ParseError(_)
        ));
    }

    #[test]
    fn test_parse_or_finish_falls_back_to_raw() {
        assert_eq!(Action::parse_or_finish("  no idea  "), Action::finish("no idea"));
        assert_eq!(Action::parse_or_finish(r#"do(action="Back")"#), Action::Back);
    }

    #[test]
    fn test_action_serializes_with_model_names() {
        let value = serde_json::to_value(Action::DoubleTap { point: Point::new(3, 4) }).unwrap();
        assert_eq!(value["action"], "Double Tap");
        assert_eq!(value["point"]["x"], 3);
    }
}
