//! Field transforms
//!
//! Ordered regex substitutions applied to a record before it is emitted.
//! Rules are compiled once when a query is prepared; a bad pattern stops
//! startup instead of failing per row.

use crate::config::Transform;
use crate::error::{MonitorError, MonitorResult};
use crate::record::{Record, Value};
use regex::{NoExpand, Regex};

#[derive(Debug, Clone)]
struct TransformRule {
    /// `None` rewrites every string field
    field: Option<String>,
    regex: Regex,
    output: String,
}

/// Compiled, ordered transform rules for one query
#[derive(Debug, Clone, Default)]
pub struct FieldTransformer {
    rules: Vec<TransformRule>,
}

impl FieldTransformer {
    /// Compile the configured transforms, keeping their order
    pub fn compile(transforms: &[Transform]) -> MonitorResult<Self> {
        let rules = transforms
            .iter()
            .map(|t| {
                let regex = Regex::new(&t.regexp).map_err(|source| MonitorError::InvalidRegex {
                    pattern: t.regexp.clone(),
                    source,
                })?;

                Ok(TransformRule {
                    field: t.field_name.clone().filter(|f| !f.is_empty()),
                    regex,
                    output: t.output.clone(),
                })
            })
            .collect::<MonitorResult<Vec<_>>>()?;

        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply every rule in order; later rules see earlier output
    ///
    /// Rules without a field name skip non-string values. A named rule whose
    /// field is missing or not a string is an error.
    pub fn apply(&self, record: &mut Record) -> MonitorResult<()> {
        for rule in &self.rules {
            match &rule.field {
                None => {
                    for value in record.values_mut() {
                        if let Value::String(s) = value {
                            rule.rewrite(s);
                        }
                    }
                }
                Some(field) => match record.get_mut(field) {
                    Some(Value::String(s)) => rule.rewrite(s),
                    Some(_) => {
                        return Err(MonitorError::TransformTarget {
                            field: field.clone(),
                            problem: "not a string",
                        })
                    }
                    None => {
                        return Err(MonitorError::TransformTarget {
                            field: field.clone(),
                            problem: "missing",
                        })
                    }
                },
            }
        }

        Ok(())
    }
}

impl TransformRule {
    fn rewrite(&self, s: &mut String) {
        if self.regex.is_match(s) {
            *s = self.regex.replace_all(s, NoExpand(&self.output)).into_owned();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_fields_skips_non_strings() {
        let transformer =
            FieldTransformer::compile(&[Transform::all_fields(r"\d+", "N")]).unwrap();
        let mut record = Record::new()
            .field("message", "took 15ms on host 7")
            .field("count", 15i64);

        transformer.apply(&mut record).unwrap();

        assert_eq!(record.get("message"), Some(&Value::from("took Nms on host N")));
        assert_eq!(record.get("count"), Some(&Value::Integer(15)));
    }

    #[test]
    fn test_output_is_literal() {
        let transformer =
            FieldTransformer::compile(&[Transform::all_fields(r"(\w+)@example", "$1")]).unwrap();
        let mut record = Record::new().field("user", "bob@example");

        transformer.apply(&mut record).unwrap();
        assert_eq!(record.get("user"), Some(&Value::from("$1")));
    }

    #[test]
    fn test_rules_compose_in_order() {
        let transformer = FieldTransformer::compile(&[
            Transform::all_fields("a", "b"),
            Transform::field("name", "b", "c"),
        ])
        .unwrap();
        let mut record = Record::new().field("name", "aaa").field("other", "aaa");

        transformer.apply(&mut record).unwrap();

        assert_eq!(record.get("name"), Some(&Value::from("ccc")));
        assert_eq!(record.get("other"), Some(&Value::from("bbb")));
    }

    #[test]
    fn test_all_fields_idempotent_on_output() {
        let transformer =
            FieldTransformer::compile(&[Transform::all_fields(r"\s+", " ")]).unwrap();
        let mut record = Record::new().field("query", "SELECT  *\n\tFROM t");

        transformer.apply(&mut record).unwrap();
        let once = record.clone();
        transformer.apply(&mut record).unwrap();

        assert_eq!(record, once);
        assert_eq!(record.get("query"), Some(&Value::from("SELECT * FROM t")));
    }

    #[test]
    fn test_named_field_errors() {
        let transformer = FieldTransformer::compile(&[Transform::field("state", "x", "y")]).unwrap();

        let mut missing = Record::new().field("other", "x");
        assert!(matches!(
            transformer.apply(&mut missing),
            Err(MonitorError::TransformTarget { problem: "missing", .. })
        ));

        let mut wrong_type = Record::new().field("state", 3i64);
        assert!(matches!(
            transformer.apply(&mut wrong_type),
            Err(MonitorError::TransformTarget { problem: "not a string", .. })
        ));
    }

    #[test]
    fn test_invalid_regex_fails_compile() {
        let err = FieldTransformer::compile(&[Transform::all_fields("(unclosed", "")]).unwrap_err();
        assert!(matches!(err, MonitorError::InvalidRegex { ref pattern, .. } if pattern == "(unclosed"));
    }
}
