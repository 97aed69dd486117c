use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(Debug)]
pub enum Formatter {
    Str(String),
    NumberU64(u64),
}

/// Replaces `$0`, `$1`, ... in `parser` with the matching argument.
pub fn formatter(mut parser: String, args: &[Formatter]) -> String {
    for (index, value) in args.iter().enumerate() {
        let placeholder = format!("${}", index);
        match value {
            Formatter::Str(s) => {
                parser = parser.replace(placeholder.as_str(), s);
            },
            Formatter::NumberU64(n) => {
                parser = parser.replace(placeholder.as_str(), &n.to_string());
            },
        }
    }
    parser
}

/// Single definition of "a usable metric value".
///
/// Finite JSON numbers and numeric strings (surrounding whitespace allowed)
/// are values. Null, empty or non-numeric strings, non-finite numbers,
/// booleans, arrays and objects are absent.
pub fn parse_metric_value(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    parsed.filter(|v| v.is_finite())
}

/// `deserialize_with` adapter: a metric field that cannot be coerced is read
/// as `None` instead of failing the whole payload.
pub fn deserialize_metric<'de, D>(
    deserializer: D,
) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_metric_value))
}

/// Splits the backend's comma separated lists, dropping blanks.
pub fn parse_comma_list(data: &str) -> Vec<String> {
    data.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_metric_value() {
        assert_eq!(parse_metric_value(&json!(21.5)), Some(21.5));
        assert_eq!(parse_metric_value(&json!(-3)), Some(-3.0));
        assert_eq!(parse_metric_value(&json!(" 6.8 ")), Some(6.8));
        assert_eq!(parse_metric_value(&json!("1e2")), Some(100.0));
        assert_eq!(parse_metric_value(&json!(null)), None);
        assert_eq!(parse_metric_value(&json!("")), None);
        assert_eq!(parse_metric_value(&json!("wet")), None);
        assert_eq!(parse_metric_value(&json!("NaN")), None);
        assert_eq!(parse_metric_value(&json!("inf")), None);
        assert_eq!(parse_metric_value(&json!(true)), None);
        assert_eq!(parse_metric_value(&json!([1])), None);
        assert_eq!(parse_metric_value(&json!({"v": 1})), None);
    }

    #[test]
    fn test_formatter() {
        let url = formatter(
            String::from("/farmers/$0/sensors/$1"),
            &[
                Formatter::NumberU64(7),
                Formatter::Str(String::from("dashboard")),
            ],
        );
        assert_eq!(url, "/farmers/7/sensors/dashboard");
    }

    #[test]
    fn test_parse_comma_list() {
        assert_eq!(parse_comma_list("A, B,,C "), vec!["A", "B", "C"]);
        assert!(parse_comma_list("").is_empty());
    }
}
