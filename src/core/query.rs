//! Query descriptors: sort specs, relation hints, filter expressions and the
//! resolved query plan
//!
//! [`FilterExpr`] is the crate's predicate representation. Callers build it
//! programmatically (or it is produced by the OData translator) and each
//! storage backend lowers it to its native form: the MongoDB backend renders
//! it into a filter document, the in-memory backend evaluates it against JSON
//! snapshots.
//!
//! [`ResolvedQuery`] is the final query plan after defaults are applied. The
//! pipeline order is deterministic and significant: soft-delete exclusion,
//! then the caller filter, then skip/take, then sorts. In the paged path the
//! sort is a *late* sort — it orders the fetched window, not the whole
//! collection — and backends must preserve that.

use std::fmt;
use std::ops::Not;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::config::{PAGE_SIZE, PagingConfig};

/// Sort direction for a single sort spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One ordering criterion: a field name and a direction.
///
/// Zero or more specs apply in the order given; ties are broken by
/// application order, stable within a query round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Eager-load hint for a related entity.
///
/// The repository carries these through untouched — resolving relations is
/// the responsibility of the calling layer, not the core. A relation is
/// either a typed field path known at compile time or a raw navigation path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationSpec {
    /// A field path known at compile time (e.g. `"owner"`).
    Field(&'static str),
    /// A raw navigation path (e.g. `"owner.address"`).
    Path(String),
}

/// Compile-time field descriptor: a field name paired with an accessor.
///
/// Replaces runtime reflection for partial updates — the caller names the
/// fields to patch and supplies a function that reads each value from the
/// entity.
///
/// # Example
///
/// ```rust,ignore
/// let spec = FieldSpec::new("status", |e: &Device| serde_json::json!(e.status));
/// repository.update_fields(&device, &[spec]).await?;
/// ```
pub struct FieldSpec<T> {
    pub name: &'static str,
    pub read: fn(&T) -> Value,
}

impl<T> FieldSpec<T> {
    pub fn new(name: &'static str, read: fn(&T) -> Value) -> Self {
        Self { name, read }
    }
}

impl<T> Clone for FieldSpec<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for FieldSpec<T> {}

impl<T> fmt::Debug for FieldSpec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec").field("name", &self.name).finish()
    }
}

/// A literal value in a filter comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Null,
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::String(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::String(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Integer(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        FilterValue::Integer(value as i64)
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Float(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Boolean(value)
    }
}

/// Comparison operator for a field/literal pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// String-matching function in a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringFn {
    Contains,
    StartsWith,
    EndsWith,
}

/// The predicate AST shared by all backends.
///
/// Field names use dot-separated paths into the entity's JSON form. Inside
/// `any`/`all` lambdas, paths are relative to the array element; the empty
/// path refers to the element itself (for scalar arrays).
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Compare {
        field: String,
        op: CompareOp,
        value: FilterValue,
    },
    In {
        field: String,
        values: Vec<FilterValue>,
    },
    Text {
        field: String,
        func: StringFn,
        needle: String,
    },
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
    Not(Box<FilterExpr>),
    /// At least one array element satisfies the predicate; with no predicate,
    /// the array is non-empty.
    Any {
        field: String,
        predicate: Option<Box<FilterExpr>>,
    },
    /// Every array element satisfies the predicate (vacuously true when the
    /// array is empty).
    All {
        field: String,
        predicate: Box<FilterExpr>,
    },
}

impl FilterExpr {
    pub fn eq(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    pub fn ge(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, CompareOp::Ge, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    pub fn le(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, CompareOp::Le, value)
    }

    pub fn compare(
        field: impl Into<String>,
        op: CompareOp,
        value: impl Into<FilterValue>,
    ) -> Self {
        FilterExpr::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn is_in(
        field: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<FilterValue>>,
    ) -> Self {
        FilterExpr::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        FilterExpr::Text {
            field: field.into(),
            func: StringFn::Contains,
            needle: needle.into(),
        }
    }

    pub fn starts_with(field: impl Into<String>, needle: impl Into<String>) -> Self {
        FilterExpr::Text {
            field: field.into(),
            func: StringFn::StartsWith,
            needle: needle.into(),
        }
    }

    pub fn ends_with(field: impl Into<String>, needle: impl Into<String>) -> Self {
        FilterExpr::Text {
            field: field.into(),
            func: StringFn::EndsWith,
            needle: needle.into(),
        }
    }

    pub fn any(field: impl Into<String>, predicate: Option<FilterExpr>) -> Self {
        FilterExpr::Any {
            field: field.into(),
            predicate: predicate.map(Box::new),
        }
    }

    pub fn all(field: impl Into<String>, predicate: FilterExpr) -> Self {
        FilterExpr::All {
            field: field.into(),
            predicate: Box::new(predicate),
        }
    }

    pub fn and(self, other: FilterExpr) -> Self {
        FilterExpr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: FilterExpr) -> Self {
        FilterExpr::Or(Box::new(self), Box::new(other))
    }

    /// Evaluate this predicate against a JSON snapshot of an entity.
    ///
    /// Used by the in-memory backend; the MongoDB backend lowers the same
    /// AST to a filter document instead. Missing fields evaluate as null.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            FilterExpr::Compare { field, op, value } => {
                compare_values(lookup(doc, field), *op, value)
            }
            FilterExpr::In { field, values } => {
                let actual = lookup(doc, field);
                values.iter().any(|v| value_eq(actual, v))
            }
            FilterExpr::Text {
                field,
                func,
                needle,
            } => match lookup(doc, field).and_then(Value::as_str) {
                Some(s) => match func {
                    StringFn::Contains => s.contains(needle.as_str()),
                    StringFn::StartsWith => s.starts_with(needle.as_str()),
                    StringFn::EndsWith => s.ends_with(needle.as_str()),
                },
                None => false,
            },
            FilterExpr::And(a, b) => a.matches(doc) && b.matches(doc),
            FilterExpr::Or(a, b) => a.matches(doc) || b.matches(doc),
            FilterExpr::Not(inner) => !inner.matches(doc),
            FilterExpr::Any { field, predicate } => {
                match lookup(doc, field).and_then(Value::as_array) {
                    Some(items) => match predicate {
                        Some(p) => items.iter().any(|item| p.matches(item)),
                        None => !items.is_empty(),
                    },
                    None => false,
                }
            }
            FilterExpr::All { field, predicate } => {
                match lookup(doc, field).and_then(Value::as_array) {
                    Some(items) => items.iter().all(|item| predicate.matches(item)),
                    None => false,
                }
            }
        }
    }
}

impl Not for FilterExpr {
    type Output = FilterExpr;

    fn not(self) -> Self::Output {
        FilterExpr::Not(Box::new(self))
    }
}

/// Resolve a dot-separated path inside a JSON value. The empty path refers
/// to the value itself (array elements in `any`/`all` lambdas).
fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(doc);
    }
    let mut current = doc;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn compare_values(actual: Option<&Value>, op: CompareOp, expected: &FilterValue) -> bool {
    match op {
        CompareOp::Eq => value_eq(actual, expected),
        CompareOp::Ne => !value_eq(actual, expected),
        CompareOp::Gt | CompareOp::Ge | CompareOp::Lt | CompareOp::Le => {
            let Some(ordering) = value_cmp(actual, expected) else {
                return false;
            };
            match op {
                CompareOp::Gt => ordering.is_gt(),
                CompareOp::Ge => ordering.is_ge(),
                CompareOp::Lt => ordering.is_lt(),
                CompareOp::Le => ordering.is_le(),
                _ => unreachable!(),
            }
        }
    }
}

fn value_eq(actual: Option<&Value>, expected: &FilterValue) -> bool {
    let actual = actual.unwrap_or(&Value::Null);
    match expected {
        FilterValue::String(s) => actual.as_str() == Some(s.as_str()),
        FilterValue::Integer(i) => actual.as_i64() == Some(*i) || actual.as_f64() == Some(*i as f64),
        FilterValue::Float(f) => actual.as_f64() == Some(*f),
        FilterValue::Boolean(b) => actual.as_bool() == Some(*b),
        FilterValue::Null => actual.is_null(),
    }
}

fn value_cmp(actual: Option<&Value>, expected: &FilterValue) -> Option<std::cmp::Ordering> {
    let actual = actual?;
    match expected {
        FilterValue::Integer(i) => actual.as_f64()?.partial_cmp(&(*i as f64)),
        FilterValue::Float(f) => actual.as_f64()?.partial_cmp(f),
        FilterValue::String(s) => Some(actual.as_str()?.cmp(s.as_str())),
        FilterValue::Boolean(_) | FilterValue::Null => None,
    }
}

/// Read-only inspection hook invoked with the resolved plan just before a
/// query executes.
pub type QueryInspector = Arc<dyn Fn(&ResolvedQuery) + Send + Sync>;

/// Page request: a 1-based page number and an optional page size.
///
/// When the size is absent the repository's paging defaults apply: 20 on the
/// unfiltered path, 10 on the filtered one. The two defaults are distinct on
/// purpose — they mirror two historically separate call sites and are kept
/// as explicit configuration rather than unified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: u64,
    pub size: Option<u32>,
}

impl Page {
    pub fn of(number: u64, size: u32) -> Self {
        Self {
            number,
            size: Some(size),
        }
    }

    pub fn number(number: u64) -> Self {
        Self { number, size: None }
    }
}

/// A repository query: filter, ordering, relation hints, soft-delete
/// inclusion and paging. All parts optional; absence means no constraint.
#[derive(Clone, Default)]
pub struct Query {
    pub filter: Option<FilterExpr>,
    pub order_by: Vec<SortSpec>,
    pub relations: Vec<RelationSpec>,
    pub include_deleted: bool,
    pub page: Option<Page>,
    /// Per-caller inspection hook; sees the resolved plan, cannot change it.
    pub inspect: Option<QueryInspector>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filtered(filter: FilterExpr) -> Self {
        Self {
            filter: Some(filter),
            ..Self::default()
        }
    }

    pub fn order_by(mut self, spec: SortSpec) -> Self {
        self.order_by.push(spec);
        self
    }

    pub fn include_deleted(mut self, include: bool) -> Self {
        self.include_deleted = include;
        self
    }

    pub fn paged(mut self, page: Page) -> Self {
        self.page = Some(page);
        self
    }

    pub fn inspect(mut self, inspector: QueryInspector) -> Self {
        self.inspect = Some(inspector);
        self
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("filter", &self.filter)
            .field("order_by", &self.order_by)
            .field("relations", &self.relations)
            .field("include_deleted", &self.include_deleted)
            .field("page", &self.page)
            .field("inspect", &self.inspect.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// The final query plan: composed filter, paging window and sort order.
///
/// `late_sort` records where the sort sits in the pipeline: `true` means the
/// sort applies to the fetched window (the repository paged path), `false`
/// means the sort applies before skip/take (the OData path).
#[derive(Debug, Clone)]
pub struct ResolvedQuery {
    pub filter: Option<FilterExpr>,
    pub skip: u64,
    pub limit: Option<u32>,
    pub order_by: Vec<SortSpec>,
    pub late_sort: bool,
}

impl ResolvedQuery {
    /// Apply pipeline steps 1–5: soft-delete exclusion, caller filter, skip
    /// and take from the page request, sort order.
    pub fn resolve(query: &Query, paging: &PagingConfig) -> Self {
        let mut filter = if query.include_deleted {
            None
        } else {
            Some(FilterExpr::eq("deleted", false))
        };
        if let Some(predicate) = &query.filter {
            filter = Some(match filter {
                Some(base) => base.and(predicate.clone()),
                None => predicate.clone(),
            });
        }

        let (skip, limit) = match query.page {
            Some(page) => {
                let size = page.size.unwrap_or(if query.filter.is_some() {
                    paging.find_page_size
                } else {
                    paging.page_size
                });
                let skip = if page.number <= 1 {
                    0
                } else {
                    (page.number - 1) * size as u64
                };
                (skip, Some(size))
            }
            None => (0, None),
        };

        Self {
            filter,
            skip,
            limit,
            order_by: query.order_by.clone(),
            late_sort: true,
        }
    }
}

/// Paged response shape handed to calling layers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedResponse<T> {
    pub data: Vec<T>,
    pub page_size: u32,
    pub max_page_size: u32,
    pub total: u64,
    pub total_pages: u64,
}

impl<T> PagedResponse<T> {
    pub fn new(data: Vec<T>, page_size: u32, total: u64) -> Self {
        let size = page_size.max(1);
        Self {
            data,
            page_size,
            max_page_size: PAGE_SIZE,
            total,
            total_pages: total.div_ceil(size as u64),
        }
    }
}
