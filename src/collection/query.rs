use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::error::{invalid_argument, DlResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
    Between,
    NotBetween,
    Like,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Between => "between",
            Operator::NotBetween => "not_between",
            Operator::Like => "like",
        }
    }
}

impl FromStr for Operator {
    type Err = crate::error::DlError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "=" => Ok(Operator::Eq),
            "!=" => Ok(Operator::NotEq),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Lte),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Gte),
            "in" => Ok(Operator::In),
            "not_in" => Ok(Operator::NotIn),
            "between" => Ok(Operator::Between),
            "not_between" => Ok(Operator::NotBetween),
            "like" => Ok(Operator::Like),
            other => Err(invalid_argument(format!("unsupported query operator '{other}'"))),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Operator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A single `[field, operator, value]` condition.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.field, self.operator, &self.value).serialize(serializer)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl From<i32> for SortDirection {
    fn from(direction: i32) -> Self {
        if direction < 0 {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }
}

impl FromStr for SortDirection {
    type Err = crate::error::DlError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "asc" | "1" => Ok(SortDirection::Asc),
            "desc" | "-1" => Ok(SortDirection::Desc),
            other => Err(invalid_argument(format!("unsupported sort direction '{other}'"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateMethod {
    Count,
    Max,
    Min,
    Avg,
    Sum,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Aggregation {
    pub method: AggregateMethod,
    pub field: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMethod {
    Increment,
    Decrement,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Operation {
    pub method: OperationMethod,
    pub field: String,
    pub value: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    pub per_page: u64,
    pub page: Option<u64>,
}

/// Accumulated query state for one collection reference.
///
/// Every mutation returns `&mut Self` so calls chain. [`QuerySpec::serialize`] consumes the
/// accumulated state: after it returns, the query is empty again (pinned filters excepted).
///
/// `aggregation` and `operation` are mutually exclusive; the last one set wins.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuerySpec {
    pinned: Vec<Filter>,
    filters: Vec<Filter>,
    sort: Vec<(String, SortDirection)>,
    group: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
    aggregation: Option<Aggregation>,
    operation: Option<Operation>,
    first_only: bool,
    page: Option<Page>,
    data: Option<Value>,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_filter(
        &mut self,
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.filters.push(Filter {
            field: field.into(),
            operator,
            value: value.into(),
        });
        self
    }

    /// Adds a filter that survives [`QuerySpec::reset`] and every serialization.
    pub fn pin_filter(
        &mut self,
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.pinned.push(Filter {
            field: field.into(),
            operator,
            value: value.into(),
        });
        self
    }

    /// Applies a `{field: value}` / `{field: [operator, value]}` mapping.
    ///
    /// A bare value means `=`. Arrays must be two elements long with an operator first.
    pub fn add_filter_map(&mut self, conditions: &Map<String, Value>) -> DlResult<&mut Self> {
        let mut parsed = Vec::with_capacity(conditions.len());
        for (field, condition) in conditions {
            match condition {
                Value::Array(pair) => match pair.as_slice() {
                    [Value::String(operator), value] => {
                        parsed.push((field.clone(), operator.parse::<Operator>()?, value.clone()));
                    }
                    _ => {
                        return Err(invalid_argument(format!(
                            "condition for '{field}' must be [operator, value]"
                        )))
                    }
                },
                value => parsed.push((field.clone(), Operator::Eq, value.clone())),
            }
        }
        for (field, operator, value) in parsed {
            self.add_filter(field, operator, value);
        }
        Ok(self)
    }

    pub fn add_sort(&mut self, field: impl Into<String>, direction: SortDirection) -> &mut Self {
        self.sort.push((field.into(), direction));
        self
    }

    pub fn set_group<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn set_limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn set_offset(&mut self, offset: u64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    pub fn set_aggregation(&mut self, method: AggregateMethod, field: Option<String>) -> &mut Self {
        self.operation = None;
        self.aggregation = Some(Aggregation { method, field });
        self
    }

    pub fn set_operation(
        &mut self,
        method: OperationMethod,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.aggregation = None;
        self.operation = Some(Operation {
            method,
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn set_first_only(&mut self, first_only: bool) -> &mut Self {
        self.first_only = first_only;
        self
    }

    pub fn set_page(&mut self, per_page: u64, page: Option<u64>) -> &mut Self {
        self.page = Some(Page { per_page, page });
        self
    }

    pub fn set_data(&mut self, data: Value) -> &mut Self {
        self.data = Some(data);
        self
    }

    pub fn filters(&self) -> impl Iterator<Item = &Filter> {
        self.pinned.iter().chain(self.filters.iter())
    }

    pub fn aggregation(&self) -> Option<&Aggregation> {
        self.aggregation.as_ref()
    }

    pub fn operation(&self) -> Option<&Operation> {
        self.operation.as_ref()
    }

    /// Drops every accumulated condition except pinned filters.
    pub fn reset(&mut self) {
        let pinned = std::mem::take(&mut self.pinned);
        *self = Self {
            pinned,
            ..Self::default()
        };
    }

    /// Produces the compact wire mapping and resets the query.
    ///
    /// Keys without a backing value are omitted: `q`, `s`, `g`, `limit`, `offset`, `p`,
    /// `page`, `f`, `aggr`, `op` and `data`.
    pub fn serialize(&mut self) -> Map<String, Value> {
        let mut taken = std::mem::take(self);
        self.pinned = taken.pinned.clone();

        let mut wire = Map::new();
        let mut filters = std::mem::take(&mut taken.pinned);
        filters.append(&mut taken.filters);
        if !filters.is_empty() {
            wire.insert("q".into(), json!(filters));
        }
        if !taken.sort.is_empty() {
            wire.insert("s".into(), json!(taken.sort));
        }
        if !taken.group.is_empty() {
            wire.insert("g".into(), json!(taken.group));
        }
        if let Some(limit) = taken.limit {
            wire.insert("limit".into(), json!(limit));
        }
        if let Some(offset) = taken.offset {
            wire.insert("offset".into(), json!(offset));
        }
        if let Some(page) = taken.page {
            wire.insert("p".into(), json!(page.per_page));
            if let Some(number) = page.page {
                wire.insert("page".into(), json!(number));
            }
        }
        if taken.first_only {
            wire.insert("f".into(), json!(1));
        }
        if let Some(aggregation) = taken.aggregation {
            wire.insert("aggr".into(), json!(aggregation));
        }
        if let Some(operation) = taken.operation {
            wire.insert("op".into(), json!(operation));
        }
        if let Some(data) = taken.data {
            wire.insert("data".into(), data);
        }
        wire
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_keep_insertion_order_and_lowercase_operators() {
        let mut query = QuerySpec::new();
        query
            .add_filter("name", "LIKE".parse().unwrap(), "%bob%")
            .add_filter("age", Operator::Gt, 18)
            .add_filter("age", Operator::Lt, 65);

        let wire = query.serialize();
        assert_eq!(
            wire["q"],
            json!([["name", "like", "%bob%"], ["age", ">", 18], ["age", "<", 65]])
        );
    }

    #[test]
    fn operator_parsing_rejects_unknown_values() {
        let err = "~=".parse::<Operator>().unwrap_err();
        assert_eq!(err.code_str(), "dl-api/invalid-argument");
        assert_eq!("Not_In".parse::<Operator>().unwrap(), Operator::NotIn);
    }

    #[test]
    fn serialize_resets_accumulated_state() {
        let mut query = QuerySpec::new();
        query
            .add_filter("a", Operator::Eq, 1)
            .add_sort("b", SortDirection::Asc)
            .set_group(["c"])
            .set_limit(10)
            .set_offset(20)
            .set_first_only(true);

        let first = query.serialize();
        assert_eq!(first.len(), 6);
        assert_eq!(query, QuerySpec::default());

        query.add_filter("z", Operator::Eq, 2);
        let second = query.serialize();
        assert_eq!(second.len(), 1);
        assert_eq!(second["q"], json!([["z", "=", 2]]));
    }

    #[test]
    fn empty_spec_serializes_to_empty_map() {
        assert!(QuerySpec::new().serialize().is_empty());
    }

    #[test]
    fn limit_offset_sort_scenario() {
        let mut query = QuerySpec::new();
        query
            .set_limit(5)
            .set_offset(5)
            .add_sort("updated_at", SortDirection::from(-1));
        assert_eq!(
            Value::Object(query.serialize()),
            json!({"limit": 5, "offset": 5, "s": [["updated_at", "desc"]]})
        );
    }

    #[test]
    fn filter_map_matches_chained_filters() {
        let mut mapped = QuerySpec::new();
        mapped
            .add_filter_map(json!({"a": 1, "b": [">", 5]}).as_object().unwrap())
            .unwrap();

        let mut chained = QuerySpec::new();
        chained
            .add_filter("a", Operator::Eq, 1)
            .add_filter("b", Operator::Gt, 5);

        assert_eq!(mapped.serialize(), chained.serialize());
    }

    #[test]
    fn filter_map_keeps_caller_order() {
        let conditions: Value =
            serde_json::from_str(r#"{"zeta": 1, "alpha": [">", 2], "mid": "x"}"#).unwrap();
        let mut query = QuerySpec::new();
        query.add_filter_map(conditions.as_object().unwrap()).unwrap();

        assert_eq!(
            query.serialize()["q"],
            json!([["zeta", "=", 1], ["alpha", ">", 2], ["mid", "=", "x"]])
        );
    }

    #[test]
    fn filter_map_rejects_malformed_pairs_without_partial_writes() {
        let mut query = QuerySpec::new();
        let err = query
            .add_filter_map(json!({"a": 1, "b": [">"]}).as_object().unwrap())
            .unwrap_err();
        assert_eq!(err.code_str(), "dl-api/invalid-argument");
        assert!(query.serialize().is_empty());
    }

    #[test]
    fn aggregation_and_operation_last_write_wins() {
        let mut query = QuerySpec::new();
        query
            .set_aggregation(AggregateMethod::Max, Some("score".into()))
            .set_operation(OperationMethod::Increment, "views", 1);
        assert!(query.aggregation().is_none());
        let wire = query.serialize();
        assert_eq!(wire["op"], json!({"method": "increment", "field": "views", "value": 1}));
        assert!(!wire.contains_key("aggr"));

        query
            .set_operation(OperationMethod::Decrement, "views", 1)
            .set_aggregation(AggregateMethod::Count, None);
        assert!(query.operation().is_none());
        let wire = query.serialize();
        assert_eq!(wire["aggr"], json!({"method": "count", "field": null}));
        assert!(!wire.contains_key("op"));
    }

    #[test]
    fn pinned_filters_survive_serialization() {
        let mut query = QuerySpec::new();
        query.pin_filter("updated_at", Operator::Gt, 1000);
        query.add_filter("room", Operator::Eq, "lobby");

        let first = query.serialize();
        assert_eq!(
            first["q"],
            json!([["updated_at", ">", 1000], ["room", "=", "lobby"]])
        );

        let second = query.serialize();
        assert_eq!(second["q"], json!([["updated_at", ">", 1000]]));

        query.reset();
        assert_eq!(query.filters().count(), 1);
    }

    #[test]
    fn page_emits_per_page_and_page_number() {
        let mut query = QuerySpec::new();
        query.set_page(25, Some(3));
        let wire = query.serialize();
        assert_eq!(wire["p"], json!(25));
        assert_eq!(wire["page"], json!(3));
    }
}
