use serde::{Deserialize, Serialize};
use std::fmt;

/// Columns a listing may be ordered by. Anything else a caller sends is replaced by
/// the default rather than reaching the SQL layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    UploadedAt,
    Filename,
    FileSize,
    CreatedAt,
}

impl SortField {
    pub fn parse_or_default(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("uploaded_at") => SortField::UploadedAt,
            Some("filename") => SortField::Filename,
            Some("file_size") => SortField::FileSize,
            Some("created_at") => SortField::CreatedAt,
            _ => SortField::default(),
        }
    }

    /// Column name in the `images` table.
    pub fn column_name(self) -> &'static str {
        match self {
            SortField::UploadedAt => "uploaded_at",
            SortField::Filename => "filename",
            SortField::FileSize => "file_size",
            SortField::CreatedAt => "created_at",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse_or_default(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("asc") => SortOrder::Asc,
            Some("desc") => SortOrder::Desc,
            _ => SortOrder::default(),
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Whitelisted ordering. Rows with equal sort keys are always ordered by `id ASC`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortOptions {
    pub field: SortField,
    pub order: SortOrder,
}

impl SortOptions {
    pub fn new(field: SortField, order: SortOrder) -> Self {
        Self { field, order }
    }

    pub fn from_raw(field: Option<&str>, order: Option<&str>) -> Self {
        Self {
            field: SortField::parse_or_default(field),
            order: SortOrder::parse_or_default(order),
        }
    }

    /// `ORDER BY` clause body, built only from whitelisted identifiers.
    pub fn order_by_sql(self, table_alias: &str) -> String {
        format!(
            "{alias}.{col} {dir}, {alias}.id ASC",
            alias = table_alias,
            col = self.field.column_name(),
            dir = self.order.keyword()
        )
    }
}

impl fmt::Display for SortOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field.column_name(), self.order.keyword().to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_fields_are_accepted() {
        let sort = SortOptions::from_raw(Some("File_Size"), Some(" ASC "));
        assert_eq!(sort, SortOptions::new(SortField::FileSize, SortOrder::Asc));
    }

    #[test]
    fn test_unknown_values_fall_back_to_default() {
        let sort = SortOptions::from_raw(Some("id; DROP TABLE images"), Some("sideways"));
        assert_eq!(sort, SortOptions::new(SortField::UploadedAt, SortOrder::Desc));
        assert_eq!(SortOptions::from_raw(None, None), SortOptions::default());
    }

    #[test]
    fn test_order_by_sql_has_id_tie_break() {
        let sort = SortOptions::new(SortField::Filename, SortOrder::Asc);
        assert_eq!(sort.order_by_sql("i"), "i.filename ASC, i.id ASC");
    }
}
