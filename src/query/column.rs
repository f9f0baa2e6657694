//! The column abstraction (spec.md §4.4): typed, joinable SQL composition.

/// A column reference: `table.name AS "alias"` at the SQL boundary, plain
/// `name` when used for in-memory comparisons.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: &'static str,
    pub table: Option<&'static str>,
    pub alias: Option<&'static str>,
}

impl Column {
    pub const fn new(name: &'static str) -> Self {
        Self { name, table: None, alias: None }
    }

    pub const fn of(table: &'static str, name: &'static str) -> Self {
        Self { name, table: Some(table), alias: None }
    }

    pub const fn aliased(mut self, alias: &'static str) -> Self {
        self.alias = Some(alias);
        self
    }

    /// `table.name`, or just `name` when no table is set.
    pub fn identifier(&self) -> String {
        match self.table {
            Some(table) => format!("{table}.{}", self.name),
            None => self.name.to_string(),
        }
    }

    /// `identifier AS "alias"`, or just `identifier` when the alias matches the column name.
    pub fn select(&self) -> String {
        match self.alias {
            Some(alias) if alias != self.name => format!("{} AS \"{alias}\"", self.identifier()),
            _ => self.identifier(),
        }
    }

    /// Prefers the alias over the identifier, since `ORDER BY` can reference a `SELECT`-list alias.
    pub fn order_by(&self) -> &str {
        self.alias.unwrap_or(self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Validated, clamped pagination request (spec.md §4.4 "Pagination").
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
    pub sort_order: SortOrder,
}

impl Pagination {
    pub const DEFAULT_LIMIT: u64 = 100;
    pub const MAX_LIMIT: u64 = 1000;

    /// Clamps `offset`/`limit` per spec.md §4.4: negative offset (represented
    /// here as any value — callers at the wire boundary map negative wire
    /// integers to `None`) becomes 0; non-positive limit becomes the
    /// default; anything above 1000 is capped at 1000.
    pub fn new(offset: Option<i64>, limit: Option<i64>, sort_order: SortOrder) -> Self {
        let offset = offset.filter(|o| *o >= 0).map(|o| o as u64).unwrap_or(0);
        let limit = match limit {
            Some(l) if l > 0 => (l as u64).min(Self::MAX_LIMIT),
            _ => Self::DEFAULT_LIMIT,
        };
        Self { offset, limit, sort_order }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None, SortOrder::default())
    }
}

/// A page of results alongside the total count computed by the same filter predicate.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub rows: Vec<T>,
    pub total_count: u64,
    pub offset: u64,
    pub limit: u64,
}

impl<T> Page<T> {
    pub fn from_all(mut all: Vec<T>, pagination: Pagination) -> Self {
        let total_count = all.len() as u64;
        let start = (pagination.offset as usize).min(all.len());
        let end = (start + pagination.limit as usize).min(all.len());
        let rows = all.drain(start..end).collect();
        Self { rows, total_count, offset: pagination.offset, limit: pagination.limit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_clamps_negative_offset_and_non_positive_limit() {
        let p = Pagination::new(Some(-5), Some(0), SortOrder::Desc);
        assert_eq!(p.offset, 0);
        assert_eq!(p.limit, Pagination::DEFAULT_LIMIT);
    }

    #[test]
    fn pagination_caps_limit_at_1000() {
        let p = Pagination::new(Some(0), Some(5000), SortOrder::Asc);
        assert_eq!(p.limit, 1000);
    }

    #[test]
    fn column_select_adds_alias_only_when_different_from_name() {
        let plain = Column::of("orgs", "name");
        assert_eq!(plain.select(), "orgs.name");

        let aliased = Column::of("orgs", "name").aliased("org_name");
        assert_eq!(aliased.select(), "orgs.name AS \"org_name\"");
    }
}
