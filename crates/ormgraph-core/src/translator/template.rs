//! Raw SQL template rendering.
//!
//! Supported directives:
//!
//! - `#bind($name)` binds the parameter: `?`
//! - `#bindEqual($name)` renders `= ?`, or `IS NULL` for a null value
//! - `#bindNotEqual($name)` renders `<> ?`, or `IS NOT NULL`
//! - `$name` inlines the parameter as text
//!
//! A `#` or `$` that starts no directive is copied as is.

use std::collections::BTreeMap;

use ormgraph_proto::Value;

use super::action::{Binding, TemplateAction};
use super::adapter::SqlAdapter;
use crate::error::{Error, Result};
use crate::query::SqlTemplate;

const DIRECTIVES: [&str; 3] = ["bindNotEqual", "bindEqual", "bind"];

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn parameter<'p>(parameters: &'p BTreeMap<String, Value>, name: &str) -> Result<&'p Value> {
    parameters.get(name).ok_or_else(|| Error::UnboundParameter { name: name.to_string() })
}

/// Length of the parameter name at the start of `rest`.
fn name_len(rest: &str) -> usize {
    rest.find(|c: char| !is_name_char(c)).unwrap_or(rest.len())
}

/// Render `template` against its own parameters.
pub fn translate_template(template: &SqlTemplate, adapter: &SqlAdapter) -> Result<TemplateAction> {
    render(template.template_for(adapter.name()), template.parameters())
}

pub(crate) fn render(text: &str, parameters: &BTreeMap<String, Value>) -> Result<TemplateAction> {
    let mut sql = String::with_capacity(text.len());
    let mut bindings = Vec::new();
    let mut rest = text;

    while let Some(pos) = rest.find(['#', '$']) {
        sql.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after_hash) = tail.strip_prefix('#') {
            let directive = DIRECTIVES
                .iter()
                .find(|d| after_hash.starts_with(*d) && after_hash[d.len()..].starts_with('('));
            let Some(directive) = directive else {
                sql.push('#');
                rest = after_hash;
                continue;
            };

            let args = &after_hash[directive.len() + 1..];
            let close = args
                .find(')')
                .ok_or_else(|| Error::InvalidTemplate(format!("unterminated #{directive} in '{text}'")))?;
            let argument = args[..close].trim();
            let name = argument
                .strip_prefix('$')
                .filter(|n| !n.is_empty() && n.chars().all(is_name_char))
                .ok_or_else(|| Error::InvalidTemplate(format!("#{directive} expects $name, got '{argument}'")))?;
            let value = parameter(parameters, name)?;

            match (*directive, value.is_null()) {
                ("bindEqual", true) => sql.push_str("IS NULL"),
                ("bindNotEqual", true) => sql.push_str("IS NOT NULL"),
                (d, _) => {
                    sql.push_str(match d {
                        "bindEqual" => "= ?",
                        "bindNotEqual" => "<> ?",
                        _ => "?",
                    });
                    bindings.push(Binding::new(Some(name.to_string()), value.clone()));
                }
            }
            rest = &args[close + 1..];
        } else {
            let after_dollar = &tail[1..];
            let len = name_len(after_dollar);
            if len == 0 {
                sql.push('$');
                rest = after_dollar;
                continue;
            }
            let name = &after_dollar[..len];
            match parameter(parameters, name)? {
                Value::String(s) => sql.push_str(s),
                other => sql.push_str(&other.to_string()),
            }
            rest = &after_dollar[len..];
        }
    }
    sql.push_str(rest);

    Ok(TemplateAction { sql, bindings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterCapabilities;
    use pretty_assertions::assert_eq;

    fn params(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_bind_directives() {
        let p = params(&[("name", Value::from("Monet")), ("born", Value::Null), ("id", Value::Int64(3))]);
        let action = render(
            "SELECT * FROM ARTIST WHERE ARTIST_NAME #bindEqual($name) AND DATE_OF_BIRTH #bindNotEqual($born) \
             AND ARTIST_ID > #bind($id)",
            &p,
        )
        .unwrap();
        assert_eq!(
            action.sql,
            "SELECT * FROM ARTIST WHERE ARTIST_NAME = ? AND DATE_OF_BIRTH IS NOT NULL AND ARTIST_ID > ?"
        );
        let values: Vec<_> = action.bindings.into_iter().map(|b| b.value).collect();
        assert_eq!(values, vec![Value::from("Monet"), Value::Int64(3)]);
    }

    #[test]
    fn test_inline_and_literal_markers() {
        let p = params(&[("table", Value::from("PAINTING")), ("n", Value::Int64(5))]);
        let action = render("SELECT '#1', '$' FROM $table LIMIT $n", &p).unwrap();
        assert_eq!(action.sql, "SELECT '#1', '$' FROM PAINTING LIMIT 5");
        assert!(action.bindings.is_empty());
    }

    #[test]
    fn test_missing_parameter() {
        let err = render("SELECT * FROM T WHERE A = #bind($a)", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, Error::UnboundParameter { name } if name == "a"));

        let err = render("SELECT #bind($a", &params(&[("a", Value::Int32(1))])).unwrap_err();
        assert!(matches!(err, Error::InvalidTemplate(_)));
    }

    #[test]
    fn test_adapter_specific_template() {
        let template = SqlTemplate::new("SELECT 1")
            .with_adapter_template("sqlite", "SELECT #bind($x)")
            .with_parameter("x", 2i32);
        let sqlite = SqlAdapter::new(AdapterCapabilities::sqlite());
        let action = translate_template(&template, &sqlite).unwrap();
        assert_eq!(action.sql, "SELECT ?");
        let action = translate_template(&template, &SqlAdapter::default()).unwrap();
        assert_eq!(action.sql, "SELECT 1");
    }
}
