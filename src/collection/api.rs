use std::future::Future;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::channel::{open_channel, ChannelOptions, RealtimeChannel};
use crate::client::constants::{CHANNEL_SEGMENT, COLLECTION_SEGMENT};
use crate::error::{invalid_argument, DlResult};
use crate::request::{RequestData, RequestHandle, RequestPipeline};

use super::pagination::{Pagination, DEFAULT_PER_PAGE};
use super::query::{AggregateMethod, OperationMethod, Operator, QuerySpec, SortDirection};

/// Reference to a server-side collection plus the query being built against it.
///
/// Builder methods accumulate conditions; terminal methods (`get`, `count`, `remove`, ...)
/// consume them, so the same reference can be reused for the next query.
#[derive(Clone, Debug)]
pub struct Collection {
    pipeline: RequestPipeline,
    name: String,
    segments: String,
    query: QuerySpec,
}

impl Collection {
    pub(crate) fn new(pipeline: RequestPipeline, name: &str) -> DlResult<Self> {
        validate_name(name)?;
        Ok(Self {
            pipeline,
            name: name.to_string(),
            segments: format!("{COLLECTION_SEGMENT}{name}"),
            query: QuerySpec::new(),
        })
    }

    pub(crate) fn for_channel(pipeline: RequestPipeline, name: &str) -> DlResult<Self> {
        let mut collection = Self::new(pipeline, name)?;
        collection.segments = format!("{CHANNEL_SEGMENT}{name}");
        Ok(collection)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn segments(&self) -> &str {
        &self.segments
    }

    pub(crate) fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    pub fn query(&self) -> &QuerySpec {
        &self.query
    }

    pub fn query_mut(&mut self) -> &mut QuerySpec {
        &mut self.query
    }

    pub fn where_eq(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.query.add_filter(field, Operator::Eq, value);
        self
    }

    pub fn where_op(
        &mut self,
        field: impl Into<String>,
        operator: &str,
        value: impl Into<Value>,
    ) -> DlResult<&mut Self> {
        let operator = operator.parse::<Operator>()?;
        self.query.add_filter(field, operator, value);
        Ok(self)
    }

    /// Applies `{field: value}` and `{field: [operator, value]}` conditions.
    pub fn where_map(&mut self, conditions: &Value) -> DlResult<&mut Self> {
        let object = conditions
            .as_object()
            .ok_or_else(|| invalid_argument("where conditions must be an object"))?;
        self.query.add_filter_map(object)?;
        Ok(self)
    }

    pub fn sort(&mut self, field: impl Into<String>, direction: impl Into<SortDirection>) -> &mut Self {
        self.query.add_sort(field, direction.into());
        self
    }

    pub fn group<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query.set_group(fields);
        self
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.query.set_limit(limit);
        self
    }

    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.query.set_offset(offset);
        self
    }

    pub fn create(&self, data: impl Into<RequestData>) -> RequestHandle {
        self.pipeline.post(&self.segments, Some(data.into()))
    }

    pub fn get(&mut self) -> RequestHandle {
        let query = self.build_request_query();
        self.pipeline.get(&self.segments, query)
    }

    pub fn first(&mut self) -> RequestHandle {
        self.query.set_first_only(true);
        self.get()
    }

    pub fn find(&mut self, id: impl Into<Value>) -> RequestHandle {
        self.where_eq("_id", id);
        self.first()
    }

    pub fn count(&mut self) -> RequestHandle {
        self.aggregate(AggregateMethod::Count, None)
    }

    pub fn max(&mut self, field: impl Into<String>) -> RequestHandle {
        self.aggregate(AggregateMethod::Max, Some(field.into()))
    }

    pub fn min(&mut self, field: impl Into<String>) -> RequestHandle {
        self.aggregate(AggregateMethod::Min, Some(field.into()))
    }

    pub fn avg(&mut self, field: impl Into<String>) -> RequestHandle {
        self.aggregate(AggregateMethod::Avg, Some(field.into()))
    }

    pub fn sum(&mut self, field: impl Into<String>) -> RequestHandle {
        self.aggregate(AggregateMethod::Sum, Some(field.into()))
    }

    fn aggregate(&mut self, method: AggregateMethod, field: Option<String>) -> RequestHandle {
        self.query.set_aggregation(method, field);
        self.get()
    }

    /// Deletes one record when `id` is given, otherwise every record matching the query.
    pub fn remove(&mut self, id: Option<&str>) -> RequestHandle {
        match id {
            Some(id) => self
                .pipeline
                .remove(&format!("{}/{id}", self.segments), None),
            None => {
                let query = self.build_request_query();
                self.pipeline.remove(&self.segments, query)
            }
        }
    }

    pub fn drop_collection(&self) -> RequestHandle {
        self.pipeline.remove(&self.segments, None)
    }

    pub fn update(&self, id: &str, data: impl Into<RequestData>) -> RequestHandle {
        self.pipeline
            .post(&format!("{}/{id}", self.segments), Some(data.into()))
    }

    pub fn increment(&mut self, field: impl Into<String>, value: impl Into<Value>) -> RequestHandle {
        self.query
            .set_operation(OperationMethod::Increment, field, value);
        let query = self.build_request_query();
        self.pipeline.put(&self.segments, query)
    }

    pub fn decrement(&mut self, field: impl Into<String>, value: impl Into<Value>) -> RequestHandle {
        self.query
            .set_operation(OperationMethod::Decrement, field, value);
        let query = self.build_request_query();
        self.pipeline.put(&self.segments, query)
    }

    /// Applies `data` to every record matching the query.
    pub fn update_all(&mut self, data: Value) -> RequestHandle {
        self.query.set_data(data);
        let query = self.build_request_query();
        self.pipeline.put(&self.segments, query)
    }

    /// Fetches the first page; later pages reuse the same query.
    pub fn paginate(
        &mut self,
        per_page: Option<u64>,
    ) -> impl Future<Output = DlResult<Pagination>> + Send + 'static {
        let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE);
        self.query.set_page(per_page, None);
        let query = self.build_query();
        Pagination::load(self.pipeline.clone(), self.segments.clone(), query)
    }

    /// Opens a realtime channel on this collection; accumulated filters narrow the stream.
    pub fn channel(self, options: ChannelOptions) -> DlResult<Arc<dyn RealtimeChannel>> {
        let Self {
            pipeline,
            name,
            query,
            ..
        } = self;
        let mut channel = Self::for_channel(pipeline, &name)?;
        channel.query = query;
        open_channel(channel, options)
    }

    /// Serializes the accumulated query and resets it.
    pub fn build_query(&mut self) -> Map<String, Value> {
        self.query.serialize()
    }

    fn build_request_query(&mut self) -> Option<RequestData> {
        let query = self.build_query();
        if query.is_empty() {
            None
        } else {
            Some(query.into())
        }
    }
}

fn validate_name(name: &str) -> DlResult<()> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'/');
    if valid {
        Ok(())
    } else {
        Err(invalid_argument(format!(
            "Invalid collection name '{name}': use lowercase letters, digits, '_' or '/'"
        )))
    }
}
