//! Collection references, the query DSL and paginated reads.

mod api;
mod pagination;
mod query;

pub use api::Collection;
pub use pagination::{Pagination, DEFAULT_PER_PAGE};
pub use query::{
    AggregateMethod, Aggregation, Filter, Operation, OperationMethod, Operator, Page, QuerySpec,
    SortDirection,
};
