//! Query filters evaluated against stored entity documents.
//!
//! A filter is a chain of conditions joined with AND / OR, where AND binds
//! tighter than OR, plus an optional ordering and paging window. Field names
//! are the serialized (JSON) names of the entity fields.

use crate::error::{PacklinkError, PacklinkResult};
use serde_json::Value;
use std::cmp::Ordering;

/// Comparison operator of a single condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `=`
    Equals,
    /// `!=`
    NotEquals,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterOrEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessOrEqual,
    /// `IN (..)`
    In,
    /// `NOT IN (..)`
    NotIn,
    /// `LIKE`, `%` matches any run of characters and `_` a single one
    Like,
    /// `IS NULL`
    IsNull,
    /// `IS NOT NULL`
    IsNotNull,
}

/// How a condition joins the ones before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    /// Both sides must hold
    And,
    /// Either side may hold
    Or,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Smallest first
    Asc,
    /// Largest first
    Desc,
}

/// A single `field <op> value` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Join with previous conditions
    pub chain: Chain,
    /// Serialized field name
    pub field: String,
    /// Operator
    pub operator: Operator,
    /// Right-hand side; ignored by the null checks
    pub value: Value,
}

impl Condition {
    /// Create an AND-chained condition.
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            chain: Chain::And,
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    fn validate(&self) -> PacklinkResult<()> {
        match self.operator {
            Operator::In | Operator::NotIn => {
                if !self.value.is_array() {
                    return Err(PacklinkError::filter(format!(
                        "operator {:?} on '{}' requires an array value",
                        self.operator, self.field
                    )));
                }
            }
            Operator::Like => {
                if !self.value.is_string() {
                    return Err(PacklinkError::filter(format!(
                        "LIKE on '{}' requires a string pattern",
                        self.field
                    )));
                }
            }
            Operator::GreaterThan
            | Operator::GreaterOrEqual
            | Operator::LessThan
            | Operator::LessOrEqual => {
                if !(self.value.is_number() || self.value.is_string()) {
                    return Err(PacklinkError::filter(format!(
                        "operator {:?} on '{}' requires a number or string",
                        self.operator, self.field
                    )));
                }
            }
            Operator::Equals | Operator::NotEquals => {
                if self.value.is_array() || self.value.is_object() {
                    return Err(PacklinkError::filter(format!(
                        "operator {:?} on '{}' requires a scalar value",
                        self.operator, self.field
                    )));
                }
            }
            Operator::IsNull | Operator::IsNotNull => {}
        }
        Ok(())
    }

    /// Whether the condition holds for `document`.
    pub fn evaluate(&self, document: &Value) -> bool {
        let actual = document.get(&self.field).unwrap_or(&Value::Null);
        match self.operator {
            Operator::Equals => values_equal(actual, &self.value),
            Operator::NotEquals => !actual.is_null() && !values_equal(actual, &self.value),
            Operator::GreaterThan => compare(actual, &self.value) == Some(Ordering::Greater),
            Operator::GreaterOrEqual => matches!(
                compare(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::LessThan => compare(actual, &self.value) == Some(Ordering::Less),
            Operator::LessOrEqual => matches!(
                compare(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::In => self
                .value
                .as_array()
                .is_some_and(|values| values.iter().any(|v| values_equal(actual, v))),
            Operator::NotIn => {
                !actual.is_null()
                    && self
                        .value
                        .as_array()
                        .is_some_and(|values| !values.iter().any(|v| values_equal(actual, v)))
            }
            Operator::Like => match (actual.as_str(), self.value.as_str()) {
                (Some(text), Some(pattern)) => like(text, pattern),
                _ => false,
            },
            Operator::IsNull => actual.is_null(),
            Operator::IsNotNull => !actual.is_null(),
        }
    }
}

/// Filter with conditions, ordering and paging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilter {
    conditions: Vec<Condition>,
    order_by: Option<(String, Direction)>,
    limit: Option<usize>,
    offset: usize,
}

impl QueryFilter {
    /// Empty filter, matching everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an AND-chained condition.
    pub fn and_where(
        mut self,
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.conditions.push(Condition::new(field, operator, value));
        self
    }

    /// Add an OR-chained condition.
    pub fn or_where(
        mut self,
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        let mut condition = Condition::new(field, operator, value);
        condition.chain = Chain::Or;
        self.conditions.push(condition);
        self
    }

    /// Shorthand for `and_where(field, Operator::Equals, value)`.
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and_where(field, Operator::Equals, value)
    }

    /// Order the result by one field.
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    /// Return at most `limit` rows.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first `offset` rows.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Conditions in insertion order.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Ordering, if any.
    pub fn ordering(&self) -> Option<(&str, Direction)> {
        self.order_by
            .as_ref()
            .map(|(field, direction)| (field.as_str(), *direction))
    }

    /// Paging window as `(offset, limit)`.
    pub fn window(&self) -> (usize, Option<usize>) {
        (self.offset, self.limit)
    }

    /// Check that every referenced field is indexed and that values fit their
    /// operators. `id` is always allowed.
    pub fn validate(&self, indexes: &[&str]) -> PacklinkResult<()> {
        let allowed = |field: &str| field == "id" || indexes.contains(&field);

        for condition in &self.conditions {
            if !allowed(&condition.field) {
                return Err(PacklinkError::filter(format!(
                    "field '{}' is not indexed",
                    condition.field
                )));
            }
            condition.validate()?;
        }

        if let Some((field, _)) = &self.order_by {
            if !allowed(field) {
                return Err(PacklinkError::filter(format!(
                    "cannot order by non-indexed field '{}'",
                    field
                )));
            }
        }

        Ok(())
    }

    /// Whether `document` satisfies the condition chain.
    pub fn matches(&self, document: &Value) -> bool {
        let mut any_group = false;
        let mut group = true;

        for (index, condition) in self.conditions.iter().enumerate() {
            if index > 0 && condition.chain == Chain::Or {
                any_group |= group;
                group = true;
            }
            group = group && condition.evaluate(document);
        }

        any_group || group
    }

    /// Compare two documents according to the ordering; `None` ordering keeps
    /// them equal.
    pub fn compare_documents(&self, left: &Value, right: &Value) -> Ordering {
        let Some((field, direction)) = self.ordering() else {
            return Ordering::Equal;
        };

        let left = left.get(field).unwrap_or(&Value::Null);
        let right = right.get(field).unwrap_or(&Value::Null);
        let ordering = match (left.is_null(), right.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => compare(left, right).unwrap_or(Ordering::Equal),
        };

        match direction {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        }
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a.as_f64() == b.as_f64(),
        },
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    // Classic two-pointer wildcard match with backtracking to the last `%`.
    let (mut t, mut p) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('%') => {
                star = Some((p, t));
                p += 1;
            }
            Some('_') => {
                t += 1;
                p += 1;
            }
            Some(c) if text.get(t) == Some(c) => {
                t += 1;
                p += 1;
            }
            _ => match star {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    star = Some((star_p, star_t + 1));
                }
                None => return false,
            },
        }
    }

    pattern.get(p..).is_some_and(|rest| rest.iter().all(|c| *c == '%'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "id": 7,
            "status": "queued",
            "queue_name": "orders-eu",
            "retries": 2,
            "finish_timestamp": null,
        })
    }

    #[test]
    fn test_equality_and_ranges() {
        let document = doc();
        assert!(QueryFilter::new().eq("status", "queued").matches(&document));
        assert!(
            QueryFilter::new()
                .and_where("retries", Operator::GreaterOrEqual, 2)
                .and_where("retries", Operator::LessThan, 3)
                .matches(&document)
        );
        assert!(
            !QueryFilter::new()
                .and_where("retries", Operator::GreaterThan, 2)
                .matches(&document)
        );
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let document = doc();
        // status = completed AND retries = 2  OR  queue_name LIKE orders%
        let filter = QueryFilter::new()
            .eq("status", "completed")
            .eq("retries", 2)
            .or_where("queue_name", Operator::Like, "orders%");
        assert!(filter.matches(&document));

        let filter = QueryFilter::new()
            .eq("status", "completed")
            .or_where("queue_name", Operator::Like, "orders%")
            .eq("retries", 5);
        assert!(!filter.matches(&document));
    }

    #[test]
    fn test_in_and_null_checks() {
        let document = doc();
        assert!(
            QueryFilter::new()
                .and_where("status", Operator::In, json!(["queued", "in_progress"]))
                .matches(&document)
        );
        assert!(
            !QueryFilter::new()
                .and_where("status", Operator::NotIn, json!(["queued"]))
                .matches(&document)
        );
        assert!(
            QueryFilter::new()
                .and_where("finish_timestamp", Operator::IsNull, Value::Null)
                .and_where("queue_name", Operator::IsNotNull, Value::Null)
                .matches(&document)
        );
    }

    #[test]
    fn test_like_wildcards() {
        assert!(like("orders-eu", "orders%"));
        assert!(like("orders-eu", "%-eu"));
        assert!(like("orders-eu", "order_-%"));
        assert!(like("abc", "%"));
        assert!(!like("orders-eu", "orders"));
        assert!(!like("abc", "a_"));
    }

    #[test]
    fn test_validation_rejects_unindexed_fields_and_bad_values() {
        let indexes = ["status", "queue_name"];
        assert!(QueryFilter::new().eq("status", "queued").validate(&indexes).is_ok());
        assert!(QueryFilter::new().eq("id", 1).validate(&indexes).is_ok());

        let err = QueryFilter::new().eq("retries", 1).validate(&indexes).unwrap_err();
        assert!(matches!(err, PacklinkError::InvalidQueryFilter { .. }));

        assert!(
            QueryFilter::new()
                .and_where("status", Operator::In, "queued")
                .validate(&indexes)
                .is_err()
        );
        assert!(
            QueryFilter::new()
                .order_by("retries", Direction::Asc)
                .validate(&indexes)
                .is_err()
        );
    }

    #[test]
    fn test_compare_documents() {
        let filter = QueryFilter::new().order_by("retries", Direction::Desc);
        let low = json!({"retries": 1});
        let high = json!({"retries": 4});
        let none = json!({});
        assert_eq!(filter.compare_documents(&low, &high), Ordering::Greater);
        assert_eq!(filter.compare_documents(&none, &low), Ordering::Greater);
    }
}
