use std::cmp::Ordering;

use serde_json::Value;

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::{DocumentKey, FieldPath, ResourcePath};

use super::converter::DocumentData;
use super::snapshot::DocumentSnapshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOperator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    ArrayContains,
    ArrayContainsAny,
    In,
    NotIn,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Equal => "==",
            FilterOperator::NotEqual => "!=",
            FilterOperator::LessThan => "<",
            FilterOperator::LessThanOrEqual => "<=",
            FilterOperator::GreaterThan => ">",
            FilterOperator::GreaterThanOrEqual => ">=",
            FilterOperator::ArrayContains => "array-contains",
            FilterOperator::ArrayContainsAny => "array-contains-any",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "not-in",
        }
    }

    fn requires_array_operand(&self) -> bool {
        matches!(
            self,
            FilterOperator::ArrayContainsAny | FilterOperator::In | FilterOperator::NotIn
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OrderDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldFilter {
    field: FieldPath,
    operator: FilterOperator,
    value: Value,
}

impl FieldFilter {
    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn operator(&self) -> FilterOperator {
        self.operator
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    fn matches(&self, data: &DocumentData) -> bool {
        let Some(candidate) = self.field.resolve(data) else {
            return false;
        };
        match self.operator {
            FilterOperator::Equal => candidate == &self.value,
            FilterOperator::NotEqual => !candidate.is_null() && candidate != &self.value,
            FilterOperator::LessThan => compare_values(candidate, &self.value) == Some(Ordering::Less),
            FilterOperator::LessThanOrEqual => matches!(
                compare_values(candidate, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOperator::GreaterThan => {
                compare_values(candidate, &self.value) == Some(Ordering::Greater)
            }
            FilterOperator::GreaterThanOrEqual => matches!(
                compare_values(candidate, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOperator::ArrayContains => candidate
                .as_array()
                .is_some_and(|items| items.contains(&self.value)),
            FilterOperator::ArrayContainsAny => match (candidate.as_array(), self.value.as_array()) {
                (Some(items), Some(needles)) => needles.iter().any(|needle| items.contains(needle)),
                _ => false,
            },
            FilterOperator::In => self
                .value
                .as_array()
                .is_some_and(|options| options.contains(candidate)),
            FilterOperator::NotIn => {
                !candidate.is_null()
                    && self
                        .value
                        .as_array()
                        .is_some_and(|options| !options.contains(candidate))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    field: FieldPath,
    direction: OrderDirection,
}

impl OrderBy {
    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn direction(&self) -> OrderDirection {
        self.direction
    }
}

/// A query targeting a single collection.
///
/// Results are filtered by every `where` clause, sorted by the `order_by`
/// clauses (document id breaks ties), then truncated to `limit`.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    collection_path: ResourcePath,
    filters: Vec<FieldFilter>,
    order_by: Vec<OrderBy>,
    limit: Option<u32>,
}

impl Query {
    pub(crate) fn new(collection_path: ResourcePath) -> Self {
        Self {
            collection_path,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    /// Returns the full resource path to the targeted collection.
    pub fn collection_path(&self) -> &ResourcePath {
        &self.collection_path
    }

    /// The identifier (last segment) of the targeted collection.
    pub fn collection_id(&self) -> &str {
        self.collection_path
            .last_segment()
            .expect("Collection path always ends with an identifier")
    }

    pub fn where_field(
        mut self,
        field: &str,
        operator: FilterOperator,
        value: impl Into<Value>,
    ) -> FirestoreResult<Self> {
        let value = value.into();
        if operator.requires_array_operand() && !value.is_array() {
            return Err(invalid_argument(format!(
                "Filters using '{}' require an array operand",
                operator.as_str()
            )));
        }
        self.filters.push(FieldFilter {
            field: FieldPath::from_dot_separated(field)?,
            operator,
            value,
        });
        Ok(self)
    }

    pub fn order_by(mut self, field: &str, direction: OrderDirection) -> FirestoreResult<Self> {
        self.order_by.push(OrderBy {
            field: FieldPath::from_dot_separated(field)?,
            direction,
        });
        Ok(self)
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Applies every constraint in order.
    pub fn with_constraints(
        self,
        constraints: impl IntoIterator<Item = QueryConstraint>,
    ) -> FirestoreResult<Self> {
        constraints
            .into_iter()
            .try_fold(self, |query, constraint| match constraint.kind {
                QueryConstraintKind::Where {
                    field,
                    operator,
                    value,
                } => query.where_field(&field, operator, value),
                QueryConstraintKind::OrderBy { field, direction } => query.order_by(&field, direction),
                QueryConstraintKind::Limit(limit) => Ok(query.limit(limit)),
            })
    }

    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    pub fn order_by_clauses(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn limit_value(&self) -> Option<u32> {
        self.limit
    }

    pub(crate) fn matches_collection(&self, key: &DocumentKey) -> bool {
        key.collection_path() == self.collection_path
    }

    /// Whether a document with `data` belongs to the result set, ignoring `limit`.
    pub(crate) fn matches(&self, data: &DocumentData) -> bool {
        self.order_by
            .iter()
            .all(|order| order.field.resolve(data).is_some())
            && self.filters.iter().all(|filter| filter.matches(data))
    }

    /// Filters, sorts and truncates `candidates` into the query result.
    pub(crate) fn apply(&self, candidates: Vec<DocumentSnapshot>) -> Vec<DocumentSnapshot> {
        let mut documents: Vec<DocumentSnapshot> = candidates
            .into_iter()
            .filter(|snapshot| self.matches_collection(snapshot.key()))
            .filter(|snapshot| snapshot.data().is_some_and(|data| self.matches(data)))
            .collect();
        documents.sort_by(|left, right| self.compare(left, right));
        if let Some(limit) = self.limit {
            documents.truncate(limit as usize);
        }
        documents
    }

    fn compare(&self, left: &DocumentSnapshot, right: &DocumentSnapshot) -> Ordering {
        for order in &self.order_by {
            let left_value = left.data().and_then(|data| order.field.resolve(data));
            let right_value = right.data().and_then(|data| order.field.resolve(data));
            let mut ordering = match (left_value, right_value) {
                (Some(a), Some(b)) => total_order(a, b),
                _ => Ordering::Equal,
            };
            if order.direction == OrderDirection::Descending {
                ordering = ordering.reverse();
            }
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        left.id().cmp(right.id())
    }
}

/// A single constraint produced by helpers such as [`where_field`], applied
/// through [`Query::with_constraints`].
#[derive(Clone, Debug)]
pub struct QueryConstraint {
    kind: QueryConstraintKind,
}

#[derive(Clone, Debug)]
enum QueryConstraintKind {
    Where {
        field: String,
        operator: FilterOperator,
        value: Value,
    },
    OrderBy {
        field: String,
        direction: OrderDirection,
    },
    Limit(u32),
}

pub fn where_field(field: impl Into<String>, operator: FilterOperator, value: impl Into<Value>) -> QueryConstraint {
    QueryConstraint {
        kind: QueryConstraintKind::Where {
            field: field.into(),
            operator,
            value: value.into(),
        },
    }
}

pub fn order_by(field: impl Into<String>, direction: OrderDirection) -> QueryConstraint {
    QueryConstraint {
        kind: QueryConstraintKind::OrderBy {
            field: field.into(),
            direction,
        },
    }
}

pub fn limit(limit: u32) -> QueryConstraint {
    QueryConstraint {
        kind: QueryConstraintKind::Limit(limit),
    }
}

/// Comparison used by range filters; values of different types are unordered.
fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Ordering used when sorting results: values order by type first, then by value.
fn total_order(left: &Value, right: &Value) -> Ordering {
    type_rank(left)
        .cmp(&type_rank(right))
        .then_with(|| compare_values(left, right).unwrap_or(Ordering::Equal))
}
