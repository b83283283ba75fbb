use std::cmp::Ordering;

use serde_json::{Map, Value};

pub type Row = Map<String, Value>;

pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlResult {
    pub rows: Vec<Row>,
    pub generated_sql: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentHit {
    pub source: Option<String>,
    pub content: String,
    pub score: Option<f64>,
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DocumentResult {
    pub documents: Vec<DocumentHit>,
}

/// Result payload as a tagged variant so consumers branch exhaustively
/// instead of probing optional fields.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultPayload {
    Sql(SqlResult),
    Document(DocumentResult),
    Hybrid {
        sql: SqlResult,
        documents: DocumentResult,
    },
}

impl ResultPayload {
    #[must_use]
    pub fn sql(&self) -> Option<&SqlResult> {
        match self {
            Self::Sql(sql) | Self::Hybrid { sql, .. } => Some(sql),
            Self::Document(_) => None,
        }
    }

    #[must_use]
    pub fn documents(&self) -> Option<&DocumentResult> {
        match self {
            Self::Document(documents) | Self::Hybrid { documents, .. } => Some(documents),
            Self::Sql(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    pub payload: ResultPayload,
    pub cached: bool,
    pub response_time_ms: f64,
}

/// Which views the current result supports. Unsupported views are disabled
/// in the presentation layer, never hidden; a hybrid result renders both
/// sections simultaneously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewAvailability {
    pub table: bool,
    pub documents: bool,
}

#[must_use]
pub fn view_availability(payload: &ResultPayload) -> ViewAvailability {
    match payload {
        ResultPayload::Sql(_) => ViewAvailability {
            table: true,
            documents: false,
        },
        ResultPayload::Document(_) => ViewAvailability {
            table: false,
            documents: true,
        },
        ResultPayload::Hybrid { .. } => ViewAvailability {
            table: true,
            documents: true,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }
}

/// Value-type-dependent cell ordering: numbers (and numeric strings)
/// compare numerically, strings lexically (ISO dates order correctly this
/// way), nulls first. Mixed types fall back to a fixed type rank so the
/// ordering stays total and the sort stays stable.
#[must_use]
pub fn compare_cells(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or(f64::NAN);
            let b = b.as_f64().unwrap_or(f64::NAN);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::String(a), Value::String(b)) => match (a.parse::<f64>(), b.parse::<f64>()) {
            (Ok(a), Ok(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => a.cmp(b),
        },
        _ => type_rank(left).cmp(&type_rank(right)),
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

/// Sorting and pagination state over a finished result. Pure: every read
/// derives the visible slice from the row set passed in, nothing is cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableViewState {
    sort: Option<(String, SortDirection)>,
    page: usize,
    page_size: usize,
}

impl TableViewState {
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        assert!(page_size > 0, "page size must be greater than 0");
        Self {
            sort: None,
            page: 0,
            page_size,
        }
    }

    #[must_use]
    pub fn sort(&self) -> Option<(&str, SortDirection)> {
        self.sort
            .as_ref()
            .map(|(key, direction)| (key.as_str(), *direction))
    }

    #[must_use]
    pub fn page(&self) -> usize {
        self.page
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Same key toggles direction; a new key resets to ascending.
    pub fn toggle_sort(&mut self, key: &str) {
        self.sort = match self.sort.take() {
            Some((current, direction)) if current == key => Some((current, direction.toggled())),
            _ => Some((key.to_string(), SortDirection::Ascending)),
        };
    }

    pub fn set_page_size(&mut self, page_size: usize) {
        assert!(page_size > 0, "page size must be greater than 0");
        self.page_size = page_size;
        self.page = 0;
    }

    pub fn set_page(&mut self, page: usize, row_count: usize) {
        self.page = page.min(self.last_page(row_count));
    }

    pub fn next_page(&mut self, row_count: usize) {
        self.page = (self.page + 1).min(self.last_page(row_count));
    }

    pub fn previous_page(&mut self) {
        self.page = self.page.saturating_sub(1);
    }

    #[must_use]
    pub fn page_count(&self, row_count: usize) -> usize {
        row_count.div_ceil(self.page_size)
    }

    fn last_page(&self, row_count: usize) -> usize {
        self.page_count(row_count).saturating_sub(1)
    }

    /// All rows in sort order. The sort is stable: rows with equal keys keep
    /// their original relative order.
    #[must_use]
    pub fn sorted_rows<'a>(&self, rows: &'a [Row]) -> Vec<&'a Row> {
        let mut sorted: Vec<&Row> = rows.iter().collect();
        if let Some((key, direction)) = &self.sort {
            sorted.sort_by(|a, b| {
                let left = a.get(key).unwrap_or(&Value::Null);
                let right = b.get(key).unwrap_or(&Value::Null);
                let ordering = compare_cells(left, right);
                match direction {
                    SortDirection::Ascending => ordering,
                    SortDirection::Descending => ordering.reverse(),
                }
            });
        }
        sorted
    }

    /// The visible page slice over the sorted rows. The page index is
    /// clamped so an overflowing page yields the last page, never an
    /// out-of-range slice; zero rows yield an empty slice.
    #[must_use]
    pub fn visible_rows<'a>(&self, rows: &'a [Row]) -> Vec<&'a Row> {
        let sorted = self.sorted_rows(rows);
        let page = self.page.min(self.last_page(sorted.len()));
        let start = page * self.page_size;
        if start >= sorted.len() {
            return Vec::new();
        }
        let end = (start + self.page_size).min(sorted.len());
        sorted[start..end].to_vec()
    }
}

impl Default for TableViewState {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

/// CSV export: header row from the first row's keys, every field wrapped in
/// quotes with embedded quotes doubled. `None` when there is nothing to
/// export.
#[must_use]
pub fn export_csv(rows: &[Row]) -> Option<String> {
    let first = rows.first()?;
    let headers: Vec<&String> = first.keys().collect();

    let mut content = String::new();
    content.push_str(
        &headers
            .iter()
            .map(|header| csv_quote(header))
            .collect::<Vec<_>>()
            .join(","),
    );
    content.push('\n');

    for row in rows {
        let fields: Vec<String> = headers
            .iter()
            .map(|header| csv_quote(&cell_text(row.get(header.as_str()))))
            .collect();
        content.push_str(&fields.join(","));
        content.push('\n');
    }
    Some(content)
}

/// JSON export: the pretty-printed row sequence, `None` when empty. Parsing
/// the output back yields the original rows with key order preserved.
#[must_use]
pub fn export_json(rows: &[Row]) -> Option<String> {
    if rows.is_empty() {
        return None;
    }
    serde_json::to_string_pretty(rows).ok()
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

fn csv_quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnippetSpan {
    pub text: String,
    pub highlighted: bool,
}

/// Splits document content into spans around case-insensitive occurrences of
/// the query, for the highlighted-snippet document view.
#[must_use]
pub fn highlight_spans(content: &str, query: &str) -> Vec<SnippetSpan> {
    let needle = query.trim();
    if content.is_empty() {
        return Vec::new();
    }
    if needle.is_empty() {
        return vec![SnippetSpan {
            text: content.to_string(),
            highlighted: false,
        }];
    }

    let haystack = content.as_bytes();
    let needle_bytes = needle.as_bytes();
    let mut spans = Vec::new();
    let mut cursor = 0;
    let mut index = 0;

    while index + needle_bytes.len() <= haystack.len() {
        let window = &haystack[index..index + needle_bytes.len()];
        if window.eq_ignore_ascii_case(needle_bytes)
            && content.is_char_boundary(index)
            && content.is_char_boundary(index + needle_bytes.len())
        {
            if cursor < index {
                spans.push(SnippetSpan {
                    text: content[cursor..index].to_string(),
                    highlighted: false,
                });
            }
            spans.push(SnippetSpan {
                text: content[index..index + needle_bytes.len()].to_string(),
                highlighted: true,
            });
            index += needle_bytes.len();
            cursor = index;
        } else {
            index += 1;
        }
    }

    if cursor < content.len() {
        spans.push(SnippetSpan {
            text: content[cursor..].to_string(),
            highlighted: false,
        });
    }
    spans
}
