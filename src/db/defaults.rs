use serde_json::Value;

use crate::models::schema::ColumnDefault;

/// Text form of a default value supplied in a request. `None` for JSON null.
pub fn literal_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// A default expression casting `text` to `type_sql`.
pub fn default_expression(text: &str, type_sql: &str) -> String {
    format!("{}::{}", quote_literal(text), type_sql)
}

/// Parses a default expression as Postgres prints it (`pg_get_expr`).
pub fn parse_default(expression: &str) -> ColumnDefault {
    match constant_value(expression) {
        Some(value) => ColumnDefault {
            value,
            is_dynamic: false,
        },
        None => ColumnDefault {
            value: Value::String(expression.to_string()),
            is_dynamic: true,
        },
    }
}

pub fn is_dynamic(expression: &str) -> bool {
    constant_value(expression).is_none()
}

fn constant_value(expression: &str) -> Option<Value> {
    let mut expr = expression.trim();
    while expr.starts_with('(') && expr.ends_with(')') {
        expr = expr[1..expr.len() - 1].trim();
    }

    if let Some(rest) = expr.strip_prefix('\'') {
        let (text, tail) = split_quoted(rest)?;
        return is_cast_suffix(tail).then_some(Value::String(text));
    }

    let (head, tail) = match expr.find("::") {
        Some(pos) => (&expr[..pos], &expr[pos..]),
        None => (expr, ""),
    };
    if !is_cast_suffix(tail) {
        return None;
    }
    let head = head.trim();
    match head.to_ascii_lowercase().as_str() {
        "null" => Some(Value::Null),
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        _ => serde_json::from_str::<serde_json::Number>(head)
            .ok()
            .map(Value::Number),
    }
}

// Splits the body of a quoted literal from what follows the closing quote.
fn split_quoted(rest: &str) -> Option<(String, &str)> {
    let mut text = String::new();
    let mut chars = rest.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            if matches!(chars.peek(), Some((_, '\''))) {
                text.push('\'');
                chars.next();
            } else {
                return Some((text, &rest[i + 1..]));
            }
        } else {
            text.push(c);
        }
    }
    None
}

fn is_cast_suffix(tail: &str) -> bool {
    let tail = tail.trim();
    if tail.is_empty() {
        return true;
    }
    tail.split("::").skip(1).all(|ty| {
        !ty.trim().is_empty()
            && ty.chars().all(|c| {
                c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '(' | ')' | ',' | '"' | '[' | ']')
            })
    }) && tail.starts_with("::")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_constant_defaults() {
        assert_eq!(
            parse_default("'5'::integer"),
            ColumnDefault {
                value: json!("5"),
                is_dynamic: false
            }
        );
        assert_eq!(parse_default("42").value, json!(42));
        assert_eq!(parse_default("(-1)").value, json!(-1));
        assert_eq!(parse_default("'it''s'::character varying").value, json!("it's"));
        assert_eq!(parse_default("true").value, json!(true));
        assert_eq!(parse_default("NULL::text").value, Value::Null);
        assert!(!parse_default("'1.50'::numeric(10, 2)").is_dynamic);
    }

    #[test]
    fn test_dynamic_defaults() {
        assert!(is_dynamic("CURRENT_TIMESTAMP"));
        assert!(is_dynamic("now()"));
        assert!(is_dynamic("nextval('users_id_seq'::regclass)"));
        assert!(is_dynamic("gen_random_uuid()"));
        assert!(is_dynamic("('a'::text || 'b'::text)"));
    }

    #[test]
    fn test_literal_rendering() {
        assert_eq!(literal_text(&json!(5)), Some("5".to_string()));
        assert_eq!(literal_text(&json!(null)), None);
        assert_eq!(default_expression("it's", "text"), "'it''s'::text");
    }
}
