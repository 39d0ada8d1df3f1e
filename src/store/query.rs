use std::cmp::Ordering as CmpOrdering;

use crate::error::{StoreError, StoreResult};
use crate::types::RowId;

use super::{CancelToken, TableRow};

/// Indexed fields shared by the three tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    RowId,
    BigmapId,
    KeyId,
    /// Natural height of a row: the log height of an update, the birth
    /// height of an allocation.
    Height,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    I64(i64),
    U64(u64),
}

impl FieldValue {
    /// Same-kind comparison; mixed kinds never compare.
    fn cmp_same(self, other: FieldValue) -> Option<CmpOrdering> {
        match (self, other) {
            (FieldValue::I64(a), FieldValue::I64(b)) => Some(a.cmp(&b)),
            (FieldValue::U64(a), FieldValue::U64(b)) => Some(a.cmp(&b)),
            _ => None,
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::I64(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::U64(v)
    }
}

#[derive(Debug, Clone)]
pub enum Filter {
    Eq(Field, FieldValue),
    Lt(Field, FieldValue),
    Le(Field, FieldValue),
    Gt(Field, FieldValue),
    Ge(Field, FieldValue),
    /// Disjunction over one field.
    AnyOf(Field, Vec<FieldValue>),
}

impl Filter {
    fn field(&self) -> Field {
        match self {
            Filter::Eq(f, _)
            | Filter::Lt(f, _)
            | Filter::Le(f, _)
            | Filter::Gt(f, _)
            | Filter::Ge(f, _)
            | Filter::AnyOf(f, _) => *f,
        }
    }

    fn matches(&self, value: FieldValue) -> bool {
        match self {
            Filter::Eq(_, want) => value == *want,
            Filter::Lt(_, want) => value.cmp_same(*want) == Some(CmpOrdering::Less),
            Filter::Le(_, want) => {
                matches!(
                    value.cmp_same(*want),
                    Some(CmpOrdering::Less | CmpOrdering::Equal)
                )
            }
            Filter::Gt(_, want) => value.cmp_same(*want) == Some(CmpOrdering::Greater),
            Filter::Ge(_, want) => {
                matches!(
                    value.cmp_same(*want),
                    Some(CmpOrdering::Greater | CmpOrdering::Equal)
                )
            }
            Filter::AnyOf(_, wants) => wants.iter().any(|want| value == *want),
        }
    }
}

/// Scan direction over the primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

/// Conjunctive predicate set plus ordering, built fluently:
///
/// ```
/// use mapledger::store::{Field, Query};
///
/// let q = Query::tagged("bigmap.copy")
///     .and_eq(Field::BigmapId, 7i64)
///     .and_le(Field::Height, 100i64)
///     .desc();
/// assert_eq!(q.tag(), "bigmap.copy");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Query {
    tag: &'static str,
    filters: Vec<Filter>,
    order: Order,
    cancel: Option<CancelToken>,
}

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    /// A query labelled for trace output.
    pub fn tagged(tag: &'static str) -> Self {
        Query {
            tag,
            ..Query::default()
        }
    }

    pub fn and_eq(mut self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.filters.push(Filter::Eq(field, value.into()));
        self
    }

    pub fn and_lt(mut self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.filters.push(Filter::Lt(field, value.into()));
        self
    }

    pub fn and_le(mut self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.filters.push(Filter::Le(field, value.into()));
        self
    }

    pub fn and_gt(mut self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.filters.push(Filter::Gt(field, value.into()));
        self
    }

    pub fn and_ge(mut self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.filters.push(Filter::Ge(field, value.into()));
        self
    }

    pub fn any_of<V: Into<FieldValue>>(
        mut self,
        field: Field,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filters
            .push(Filter::AnyOf(field, values.into_iter().map(V::into).collect()));
        self
    }

    pub fn desc(mut self) -> Self {
        self.order = Order::Desc;
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn tag(&self) -> &'static str {
        self.tag
    }

    pub fn order(&self) -> Order {
        self.order
    }

    /// Errors out when the attached token has been cancelled. Backends
    /// call this once per scanned row.
    pub fn check_cancel(&self) -> StoreResult<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(StoreError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Conjunction over all filters; absent fields never match.
    pub fn matches<R: TableRow>(&self, row: &R) -> bool {
        self.filters.iter().all(|filter| {
            row.field(filter.field())
                .is_some_and(|value| filter.matches(value))
        })
    }

    /// Inclusive primary-key bounds implied by the row-id filters, used
    /// by backends to prune range scans.
    pub fn row_id_bounds(&self) -> (RowId, RowId) {
        let mut lo = RowId::MIN;
        let mut hi = RowId::MAX;
        for filter in &self.filters {
            if filter.field() != Field::RowId {
                continue;
            }
            match filter {
                Filter::Eq(_, FieldValue::U64(v)) => {
                    lo = lo.max(*v);
                    hi = hi.min(*v);
                }
                Filter::Lt(_, FieldValue::U64(v)) => hi = hi.min(v.saturating_sub(1)),
                Filter::Le(_, FieldValue::U64(v)) => hi = hi.min(*v),
                Filter::Gt(_, FieldValue::U64(v)) => lo = lo.max(v.saturating_add(1)),
                Filter::Ge(_, FieldValue::U64(v)) => lo = lo.max(*v),
                _ => {}
            }
        }
        (lo, hi)
    }
}
