//! `{{ results.N }}` substitution in action parameters.
//!
//! A parameter may embed the value an earlier step produced, by position in
//! the results sequence, optionally followed by a field path:
//! `{{ results.0 }}`, `{{ results.2.items.0 }}`. Unknown references are left
//! as-is (not an error).

use serde_json::Value;

pub fn render(template: &str, results: &[Value]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let marker = &rest[start..start + 2 + end + 2];
        match resolve(after[..end].trim(), results) {
            Some(value) => out.push_str(&value_to_string(value)),
            None => out.push_str(marker),
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

fn resolve<'a>(expr: &str, results: &'a [Value]) -> Option<&'a Value> {
    let mut segments = expr.strip_prefix("results.")?.split('.');
    let index: usize = segments.next()?.parse().ok()?;
    let mut value = results.get(index)?;
    for segment in segments {
        value = match value {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(value)
}

/// Convert a JSON value to a display string for template resolution.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_resolve_positional_result() {
        let results = vec![json!("https://example.com/a"), json!(42)];
        assert_eq!(
            render("open {{ results.0 }} then {{results.1}}", &results),
            "open https://example.com/a then 42"
        );
    }

    #[test]
    fn test_resolve_field_path() {
        let results = vec![json!({"items": [{"id": "x7"}]})];
        assert_eq!(render("#row-{{ results.0.items.0.id }}", &results), "#row-x7");
    }

    #[test]
    fn test_objects_render_as_json() {
        let results = vec![json!({"a": 1})];
        assert_eq!(render("{{ results.0 }}", &results), r#"{"a":1}"#);
    }

    #[test]
    fn test_unknown_reference_left_asis() {
        let results = vec![json!("a")];
        let template = "{{ results.5 }} {{ steps.x }} {{ results.0.missing }}";
        assert_eq!(render(template, &results), template);
    }

    #[test]
    fn test_unterminated_marker_left_asis() {
        assert_eq!(render("a {{ results.0", &[json!("x")]), "a {{ results.0");
    }

    #[test]
    fn test_plain_text_unchanged() {
        assert_eq!(render("#submit", &[]), "#submit");
    }
}
