//! Query parameters for identifier lookups.

use crate::frame::CellValue;

/// Equality filters plus optional projection, ordering and limit.
///
/// Filters are ANDed together. A `CellValue::Null` filter matches rows where
/// the column is null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentifierQuery {
    /// `(column, value)` pairs, in insertion order.
    pub filters: Vec<(String, CellValue)>,
    /// Columns to return; all table columns when `None`.
    pub columns: Option<Vec<String>>,
    pub order_by: Option<String>,
    pub descending: bool,
    pub limit: Option<usize>,
}

impl IdentifierQuery {
    /// Create a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality filter.
    pub fn with_filter(mut self, column: impl Into<String>, value: impl Into<CellValue>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    /// Restrict the returned columns.
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order_by = Some(column.into());
        self.descending = descending;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Requested columns with repeats dropped, first occurrence kept.
    pub(crate) fn projection(&self) -> Option<Vec<&str>> {
        self.columns.as_ref().map(|columns| {
            let mut names: Vec<&str> = Vec::with_capacity(columns.len());
            for column in columns {
                if !names.contains(&column.as_str()) {
                    names.push(column);
                }
            }
            names
        })
    }

    /// Every column name the query refers to.
    pub(crate) fn referenced_columns(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.filters.iter().map(|(c, _)| c.as_str()).collect();
        if let Some(columns) = &self.columns {
            names.extend(columns.iter().map(String::as_str));
        }
        if let Some(order_by) = &self.order_by {
            names.push(order_by);
        }
        names
    }
}

impl<K, V> FromIterator<(K, V)> for IdentifierQuery
where
    K: Into<String>,
    V: Into<CellValue>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        iter.into_iter()
            .fold(Self::new(), |query, (k, v)| query.with_filter(k, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let query = IdentifierQuery::new()
            .with_filter("ticker", "AAPL")
            .with_filter("exchange", Option::<&str>::None)
            .with_columns(["ticker", "isin"])
            .with_order_by("isin", true)
            .with_limit(5);

        assert_eq!(
            query.filters,
            vec![
                ("ticker".to_string(), CellValue::Text("AAPL".into())),
                ("exchange".to_string(), CellValue::Null),
            ]
        );
        assert_eq!(query.columns, Some(vec!["ticker".to_string(), "isin".to_string()]));
        assert!(query.descending);
        assert_eq!(query.limit, Some(5));
        assert_eq!(
            query.referenced_columns(),
            vec!["ticker", "exchange", "ticker", "isin", "isin"]
        );
    }

    #[test]
    fn test_projection_drops_repeated_columns() {
        let query = IdentifierQuery::new().with_columns(["ticker", "isin", "ticker"]);
        assert_eq!(query.projection(), Some(vec!["ticker", "isin"]));

        assert_eq!(IdentifierQuery::new().projection(), None);
        assert_eq!(
            IdentifierQuery::new().with_columns(Vec::<String>::new()).projection(),
            Some(vec![])
        );
    }

    #[test]
    fn test_from_pairs() {
        let query: IdentifierQuery = [("ticker", "MSFT"), ("currency", "USD")]
            .into_iter()
            .collect();

        assert_eq!(query.filters.len(), 2);
        assert_eq!(query.filters[1].0, "currency");
        assert!(query.columns.is_none());
        assert!(query.limit.is_none());
    }
}
