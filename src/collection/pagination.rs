use serde_json::{Map, Value};

use crate::error::{invalid_argument, DlResult};
use crate::request::RequestPipeline;

pub const DEFAULT_PER_PAGE: u64 = 50;

/// One page of a paginated collection query.
///
/// The query is captured when the first page is requested; `next`, `previous` and `goto`
/// re-issue it with a different page number.
#[derive(Clone, Debug)]
pub struct Pagination {
    pipeline: RequestPipeline,
    segments: String,
    query: Map<String, Value>,
    fetching: bool,
    pub total: u64,
    pub per_page: u64,
    pub current_page: u64,
    pub last_page: u64,
    pub from: Option<u64>,
    pub to: Option<u64>,
    pub items: Vec<Value>,
}

impl Pagination {
    pub(crate) async fn load(
        pipeline: RequestPipeline,
        segments: String,
        query: Map<String, Value>,
    ) -> DlResult<Self> {
        let per_page = query
            .get("p")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_PER_PAGE);
        let mut pagination = Self {
            pipeline,
            segments,
            query,
            fetching: false,
            total: 0,
            per_page,
            current_page: 0,
            last_page: 0,
            from: None,
            to: None,
            items: Vec::new(),
        };
        pagination.fetch(1).await?;
        Ok(pagination)
    }

    pub fn has_next(&self) -> bool {
        self.current_page < self.last_page
    }

    pub fn has_previous(&self) -> bool {
        self.current_page > 1
    }

    pub fn is_fetching(&self) -> bool {
        self.fetching
    }

    /// Loads the following page. Returns `false` without a request when on the last page.
    pub async fn next(&mut self) -> DlResult<bool> {
        if !self.has_next() {
            return Ok(false);
        }
        self.fetch(self.current_page + 1).await?;
        Ok(true)
    }

    pub async fn previous(&mut self) -> DlResult<bool> {
        if !self.has_previous() {
            return Ok(false);
        }
        self.fetch(self.current_page - 1).await?;
        Ok(true)
    }

    pub async fn goto(&mut self, page: u64) -> DlResult<()> {
        if page == 0 {
            return Err(invalid_argument("page numbers start at 1"));
        }
        self.fetch(page).await
    }

    async fn fetch(&mut self, page: u64) -> DlResult<()> {
        let mut query = self.query.clone();
        query.insert("page".into(), Value::from(page));

        self.fetching = true;
        let result = self.pipeline.get(&self.segments, Some(query.into())).await;
        self.fetching = false;

        self.apply(&result?, page);
        Ok(())
    }

    fn apply(&mut self, body: &Value, requested: u64) {
        self.total = number(body, "total").unwrap_or(0);
        self.per_page = number(body, "per_page").unwrap_or(self.per_page);
        self.current_page = number(body, "current_page").unwrap_or(requested);
        self.last_page = number(body, "last_page").unwrap_or(self.current_page);
        self.from = number(body, "from");
        self.to = number(body, "to");
        self.items = body
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
    }
}

// Paginator fields sometimes arrive as numeric strings.
fn number(body: &Value, key: &str) -> Option<u64> {
    match body.get(key)? {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}
