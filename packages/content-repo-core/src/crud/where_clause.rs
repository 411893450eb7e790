//! JSON `where` clauses.
//!
//! A clause is an object keyed by record attribute. A bare value matches by
//! equality; an object of operators (`{"gte": 3, "lt": 9}`) applies each of
//! them. `AND`, `OR` and `NOT` combine sub-clauses:
//!
//! ```json
//! {"OR": [{"status": "open"}, {"priority": {"gte": 3}}], "NOT": {"archived": true}}
//! ```

use serde_json::{Map, Value};

use crate::error::{RepoError, Result};
use crate::registry::CollectionRuntime;
use crate::schema::columns::{CREATED_AT, DELETED_AT, UPDATED_AT};
use crate::schema::{FieldTypeRegistry, Operator};
use crate::store::Filter;

const SYSTEM_OPERATORS: &[Operator] = &[
    Operator::Eq,
    Operator::Ne,
    Operator::Gt,
    Operator::Gte,
    Operator::Lt,
    Operator::Lte,
    Operator::In,
    Operator::NotIn,
    Operator::IsNull,
    Operator::IsNotNull,
];

pub(crate) struct WhereParser<'a> {
    runtime: &'a CollectionRuntime,
    field_types: &'a FieldTypeRegistry,
}

impl<'a> WhereParser<'a> {
    pub(crate) fn new(runtime: &'a CollectionRuntime, field_types: &'a FieldTypeRegistry) -> Self {
        Self {
            runtime,
            field_types,
        }
    }

    fn error(&self, field: &str, message: impl Into<String>) -> RepoError {
        RepoError::validation(self.runtime.name(), field, message)
    }

    /// Parses a clause into a filter over assembled records.
    pub(crate) fn parse(&self, clause: &Value) -> Result<Filter> {
        let Value::Object(entries) = clause else {
            return Err(self.error("where", "clause must be an object"));
        };
        let mut filters = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let filter = match key.as_str() {
                "AND" | "and" => Filter::And(self.parse_list(key, value)?),
                "OR" | "or" => Filter::Or(self.parse_list(key, value)?),
                "NOT" | "not" => Filter::Not(Box::new(self.parse(value)?)),
                attribute => self.parse_attribute(attribute, value)?,
            };
            filters.push(filter);
        }
        Ok(Filter::and(filters))
    }

    fn parse_list(&self, key: &str, value: &Value) -> Result<Vec<Filter>> {
        let Value::Array(clauses) = value else {
            return Err(self.error(key, "expects an array of clauses"));
        };
        clauses.iter().map(|c| self.parse(c)).collect()
    }

    fn allowed_operators(&self, attribute: &str) -> Result<Vec<Operator>> {
        let runtime = self.runtime;
        if attribute == runtime.schema.primary_key && runtime.field(attribute).is_none() {
            return Ok(SYSTEM_OPERATORS.to_vec());
        }
        let timestamps = runtime.definition.options.timestamps
            && (attribute == CREATED_AT || attribute == UPDATED_AT);
        let deleted = runtime.definition.options.soft_delete && attribute == DELETED_AT;
        if timestamps || deleted {
            return Ok(SYSTEM_OPERATORS.to_vec());
        }
        let field = runtime
            .field(attribute)
            .ok_or_else(|| self.error(attribute, "unknown attribute"))?;
        let field_type = self.field_types.for_field(runtime.name(), field)?;
        Ok(field_type.operators().to_vec())
    }

    fn parse_attribute(&self, attribute: &str, value: &Value) -> Result<Filter> {
        let allowed = self.allowed_operators(attribute)?;
        let operators = match value {
            Value::Object(map) if is_operator_object(map) => map.clone(),
            _ => {
                let mut eq = Map::new();
                eq.insert(Operator::Eq.as_str().to_string(), value.clone());
                eq
            }
        };

        let mut filters = Vec::with_capacity(operators.len());
        for (name, operand) in &operators {
            let operator = Operator::parse(name)
                .ok_or_else(|| self.error(attribute, format!("unknown operator '{name}'")))?;
            if !allowed.contains(&operator) {
                return Err(self.error(
                    attribute,
                    format!("operator '{}' is not supported", operator.as_str()),
                ));
            }
            filters.push(self.build(attribute, operator, operand)?);
        }
        Ok(Filter::and(filters))
    }

    fn build(&self, attribute: &str, operator: Operator, operand: &Value) -> Result<Filter> {
        let column = attribute.to_string();
        let list = || match operand {
            Value::Array(items) => Ok(items.clone()),
            _ => Err(self.error(attribute, format!("'{}' expects an array", operator.as_str()))),
        };
        let flag = || match operand {
            Value::Bool(flag) => Ok(*flag),
            _ => Err(self.error(attribute, format!("'{}' expects a boolean", operator.as_str()))),
        };
        Ok(match operator {
            Operator::Eq => Filter::Eq(column, operand.clone()),
            Operator::Ne => Filter::Ne(column, operand.clone()),
            Operator::Gt => Filter::Gt(column, operand.clone()),
            Operator::Gte => Filter::Gte(column, operand.clone()),
            Operator::Lt => Filter::Lt(column, operand.clone()),
            Operator::Lte => Filter::Lte(column, operand.clone()),
            Operator::In => Filter::In(column, list()?),
            Operator::NotIn => Filter::NotIn(column, list()?),
            Operator::Like => match operand.as_str() {
                Some(pattern) => Filter::Like(column, pattern.to_string()),
                None => return Err(self.error(attribute, "'like' expects a string pattern")),
            },
            Operator::Contains => Filter::Contains(column, operand.clone()),
            Operator::IsNull | Operator::IsNotNull => {
                if flag()? == (operator == Operator::IsNull) {
                    Filter::IsNull(column)
                } else {
                    Filter::IsNotNull(column)
                }
            }
        })
    }
}

fn is_operator_object(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| Operator::parse(k).is_some())
}
