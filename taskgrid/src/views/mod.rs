//! Filtering, sorting, pagination, and facet counts over the working set.
//!
//! Everything here is a pure function of an `Arc<TaskSet>` and a query.
//! [`DerivedViews`] memoizes the results on the set's identity, so a sync
//! that keeps the same `Arc` costs no recomputation at all.

mod facets;

use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use taskgrid_proto::task::{Task, TaskLabel, TaskPriority, TaskStatus};

use crate::sync::TaskSet;

pub use facets::{FacetCounts, compute_facets};

fn normalize_text(value: &str) -> String {
    value.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// Filtering
// ---------------------------------------------------------------------------

/// Which rows to keep. Empty sets mean "any value".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TaskFilter {
    /// Case-insensitive substring matched against title and code.
    pub title_query: Option<String>,
    pub statuses: BTreeSet<TaskStatus>,
    pub labels: BTreeSet<TaskLabel>,
    pub priorities: BTreeSet<TaskPriority>,
    /// Archived tasks are hidden unless this is set.
    pub include_archived: bool,
}

/// A filter dimension that facet counting can ignore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dimension {
    Status,
    Label,
    Priority,
}

/// A filter with its text query normalized once.
pub(crate) struct PreparedFilter<'a> {
    filter: &'a TaskFilter,
    query: Option<String>,
}

impl<'a> PreparedFilter<'a> {
    pub(crate) fn new(filter: &'a TaskFilter) -> Self {
        let query = filter
            .title_query
            .as_deref()
            .map(normalize_text)
            .filter(|q| !q.is_empty());
        Self { filter, query }
    }

    /// Applies every criterion except `ignore`.
    pub(crate) fn matches_ignoring(&self, task: &Task, ignore: Option<Dimension>) -> bool {
        let f = self.filter;
        if task.archived && !f.include_archived {
            return false;
        }
        if ignore != Some(Dimension::Status)
            && !f.statuses.is_empty()
            && !f.statuses.contains(&task.status)
        {
            return false;
        }
        if ignore != Some(Dimension::Label)
            && !f.labels.is_empty()
            && !f.labels.contains(&task.label)
        {
            return false;
        }
        if ignore != Some(Dimension::Priority)
            && !f.priorities.is_empty()
            && !f.priorities.contains(&task.priority)
        {
            return false;
        }
        match &self.query {
            None => true,
            Some(query) => {
                normalize_text(&task.title).contains(query.as_str())
                    || normalize_text(&task.code).contains(query.as_str())
            }
        }
    }
}

impl TaskFilter {
    /// Returns `true` if `task` passes every criterion.
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        PreparedFilter::new(self).matches_ignoring(task, None)
    }
}

/// Positions of the rows in `set` that pass `filter`, in collection order.
#[must_use]
pub fn filter_indices(set: &TaskSet, filter: &TaskFilter) -> Vec<usize> {
    let prepared = PreparedFilter::new(filter);
    set.iter()
        .enumerate()
        .filter(|(_, task)| prepared.matches_ignoring(task, None))
        .map(|(idx, _)| idx)
        .collect()
}

// ---------------------------------------------------------------------------
// Sorting
// ---------------------------------------------------------------------------

/// Error returned for an unknown sort column or direction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid sort {0:?} (expected <column>[:asc|:desc])")]
pub struct ParseSortError(String);

/// Sortable table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortColumn {
    Code,
    Title,
    Status,
    Label,
    Priority,
    EstimatedHours,
    CreatedAt,
    UpdatedAt,
}

impl FromStr for SortColumn {
    type Err = ParseSortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_text(s).as_str() {
            "code" => Ok(Self::Code),
            "title" => Ok(Self::Title),
            "status" => Ok(Self::Status),
            "label" => Ok(Self::Label),
            "priority" => Ok(Self::Priority),
            "estimate" | "estimated-hours" | "hours" => Ok(Self::EstimatedHours),
            "created" | "created-at" => Ok(Self::CreatedAt),
            "updated" | "updated-at" => Ok(Self::UpdatedAt),
            _ => Err(ParseSortError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Column plus direction. Rows that tie on the column are ordered by id,
/// so the result is a total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SortSpec {
    pub column: SortColumn,
    pub direction: SortDirection,
}

impl SortSpec {
    #[must_use]
    pub const fn ascending(column: SortColumn) -> Self {
        Self {
            column,
            direction: SortDirection::Ascending,
        }
    }

    #[must_use]
    pub const fn descending(column: SortColumn) -> Self {
        Self {
            column,
            direction: SortDirection::Descending,
        }
    }

    /// Compares two tasks under this spec.
    #[must_use]
    pub fn compare(&self, a: &Task, b: &Task) -> CmpOrdering {
        let primary = match self.column {
            SortColumn::Code => a.code.cmp(&b.code),
            SortColumn::Title => normalize_text(&a.title)
                .cmp(&normalize_text(&b.title))
                .then_with(|| a.title.cmp(&b.title)),
            SortColumn::Status => a.status.cmp(&b.status),
            SortColumn::Label => a.label.cmp(&b.label),
            SortColumn::Priority => a.priority.cmp(&b.priority),
            SortColumn::EstimatedHours => a.estimated_hours.total_cmp(&b.estimated_hours),
            SortColumn::CreatedAt => a.created_at.cmp(&b.created_at),
            SortColumn::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        };
        let primary = match self.direction {
            SortDirection::Ascending => primary,
            SortDirection::Descending => primary.reverse(),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }
}

impl FromStr for SortSpec {
    type Err = ParseSortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (column, direction) = match s.rsplit_once(':') {
            Some((column, dir)) => {
                let direction = match normalize_text(dir).as_str() {
                    "asc" => SortDirection::Ascending,
                    "desc" => SortDirection::Descending,
                    _ => return Err(ParseSortError(s.to_string())),
                };
                (column, direction)
            }
            None => (s, SortDirection::Ascending),
        };
        let column = column
            .parse::<SortColumn>()
            .map_err(|_| ParseSortError(s.to_string()))?;
        Ok(Self { column, direction })
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let column = match self.column {
            SortColumn::Code => "code",
            SortColumn::Title => "title",
            SortColumn::Status => "status",
            SortColumn::Label => "label",
            SortColumn::Priority => "priority",
            SortColumn::EstimatedHours => "estimate",
            SortColumn::CreatedAt => "created",
            SortColumn::UpdatedAt => "updated",
        };
        let direction = match self.direction {
            SortDirection::Ascending => "asc",
            SortDirection::Descending => "desc",
        };
        write!(f, "{column}:{direction}")
    }
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// Requested page. A `size` of zero means a single page with every row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PageRequest {
    pub index: usize,
    pub size: usize,
}

/// One page of the derived table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewPage {
    pub rows: Vec<Task>,
    /// Rows passing the filter, across all pages.
    pub total_rows: usize,
    /// Always at least one, even for an empty result.
    pub page_count: usize,
    /// Page actually returned, after clamping.
    pub page_index: usize,
}

/// Everything that determines a [`ViewPage`] besides the data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ViewQuery {
    pub filter: TaskFilter,
    /// `None` keeps collection order.
    pub sort: Option<SortSpec>,
    pub page: PageRequest,
}

/// Filtered row positions, sorted if requested.
fn ordered_indices(set: &TaskSet, filter: &TaskFilter, sort: Option<SortSpec>) -> Vec<usize> {
    let mut indices = filter_indices(set, filter);
    if let Some(spec) = sort {
        let tasks = set.tasks();
        indices.sort_by(|&a, &b| spec.compare(&tasks[a], &tasks[b]));
    }
    indices
}

fn paginate(set: &TaskSet, indices: &[usize], page: PageRequest) -> ViewPage {
    let total_rows = indices.len();
    let size = if page.size == 0 { total_rows.max(1) } else { page.size };
    let page_count = total_rows.div_ceil(size).max(1);
    let page_index = page.index.min(page_count - 1);
    let start = page_index * size;
    let end = (start + size).min(total_rows);
    let tasks = set.tasks();
    ViewPage {
        rows: indices
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(|&idx| tasks[idx].clone())
            .collect(),
        total_rows,
        page_count,
        page_index,
    }
}

/// Computes one page of the derived table, without memoization.
#[must_use]
pub fn build_view(set: &TaskSet, query: &ViewQuery) -> ViewPage {
    let indices = ordered_indices(set, &query.filter, query.sort);
    paginate(set, &indices, query.page)
}

// ---------------------------------------------------------------------------
// Memoization
// ---------------------------------------------------------------------------

struct OrderedRows {
    set: Arc<TaskSet>,
    filter: TaskFilter,
    sort: Option<SortSpec>,
    indices: Arc<Vec<usize>>,
}

struct CachedFacets {
    set: Arc<TaskSet>,
    filter: TaskFilter,
    counts: Arc<FacetCounts>,
}

/// Memoized derived views keyed by working-set identity.
///
/// Filtering and sorting are recomputed only when the `Arc<TaskSet>` or
/// the filter/sort change; paging through a result reuses the ordering.
#[derive(Default)]
pub struct DerivedViews {
    rows: Mutex<Option<OrderedRows>>,
    facets: Mutex<Option<CachedFacets>>,
    recomputes: AtomicUsize,
}

impl DerivedViews {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the requested page of `set`.
    pub fn view(&self, set: &Arc<TaskSet>, query: &ViewQuery) -> ViewPage {
        let indices = {
            let mut slot = self.rows.lock();
            match slot.as_ref() {
                Some(cached)
                    if Arc::ptr_eq(&cached.set, set)
                        && cached.filter == query.filter
                        && cached.sort == query.sort =>
                {
                    Arc::clone(&cached.indices)
                }
                _ => {
                    self.recomputes.fetch_add(1, Ordering::Relaxed);
                    let indices = Arc::new(ordered_indices(set, &query.filter, query.sort));
                    *slot = Some(OrderedRows {
                        set: Arc::clone(set),
                        filter: query.filter.clone(),
                        sort: query.sort,
                        indices: Arc::clone(&indices),
                    });
                    indices
                }
            }
        };
        paginate(set, &indices, query.page)
    }

    /// Facet counts for `set` under `filter`.
    pub fn facets(&self, set: &Arc<TaskSet>, filter: &TaskFilter) -> Arc<FacetCounts> {
        let mut slot = self.facets.lock();
        if let Some(cached) = slot.as_ref() {
            if Arc::ptr_eq(&cached.set, set) && &cached.filter == filter {
                return Arc::clone(&cached.counts);
            }
        }
        self.recomputes.fetch_add(1, Ordering::Relaxed);
        let counts = Arc::new(compute_facets(set, filter));
        *slot = Some(CachedFacets {
            set: Arc::clone(set),
            filter: filter.clone(),
            counts: Arc::clone(&counts),
        });
        counts
    }

    /// Number of filter/sort or facet computations performed so far.
    #[must_use]
    pub fn recompute_count(&self) -> usize {
        self.recomputes.load(Ordering::Relaxed)
    }
}
