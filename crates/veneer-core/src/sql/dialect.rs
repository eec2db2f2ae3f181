//! Dialect capability record.
//!
//! One flat record per backend kind captures every point where generated
//! SQL differs: identifier quoting, parameter placeholders, row limiting,
//! JSON projection, RETURNING support, and the upsert statement form. The
//! record is plain data dispatched by `database-type`; there is no dialect
//! class hierarchy.

use veneer_config::DatabaseKind;
use veneer_error::{Result, VeneerError};

/// Parameter placeholder style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    /// `@p0, @p1, ...` (SQL Server).
    AtNumbered,
    /// `$1, $2, ...` (PostgreSQL).
    DollarNumbered,
    /// `?` positional (MySQL).
    Question,
}

/// Row-limit clause style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitStyle {
    /// `LIMIT n` after ORDER BY.
    Limit,
    /// `TOP (n)` after SELECT.
    Top,
}

/// JSON projection style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonStyle {
    /// `FOR JSON PATH` subqueries (SQL Server).
    ForJsonPath,
    /// `json_build_object` / `json_agg` (PostgreSQL).
    PostgresJson,
    /// `JSON_OBJECT` / `JSON_ARRAYAGG` (MySQL).
    MysqlJson,
}

/// RETURNING support for writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturningStyle {
    /// `OUTPUT INSERTED.<col>` (SQL Server).
    OutputInserted,
    /// `RETURNING <col>` (PostgreSQL).
    Returning,
    /// No returning clause; the driver reports generated keys itself.
    None,
}

/// Upsert statement form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStyle {
    /// `MERGE` (SQL Server).
    Merge,
    /// `INSERT ... ON CONFLICT (pk) DO UPDATE` (PostgreSQL).
    OnConflict,
    /// `INSERT ... ON DUPLICATE KEY UPDATE` (MySQL).
    OnDuplicateKey,
}

/// Everything the renderer needs to know about one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    /// Backend kind this record describes.
    pub kind: DatabaseKind,
    quote: (char, char),
    /// Placeholder style.
    pub param: ParamStyle,
    /// LIMIT/TOP style.
    pub limit: LimitStyle,
    /// JSON projection style.
    pub json: JsonStyle,
    /// RETURNING style for writes.
    pub returning: ReturningStyle,
    /// Upsert statement form.
    pub upsert: UpsertStyle,
}

impl Dialect {
    /// SQL Server (also covers the Synapse SQL dialect).
    #[must_use]
    pub const fn mssql() -> Self {
        Self {
            kind: DatabaseKind::Mssql,
            quote: ('[', ']'),
            param: ParamStyle::AtNumbered,
            limit: LimitStyle::Top,
            json: JsonStyle::ForJsonPath,
            returning: ReturningStyle::OutputInserted,
            upsert: UpsertStyle::Merge,
        }
    }

    /// PostgreSQL.
    #[must_use]
    pub const fn postgres() -> Self {
        Self {
            kind: DatabaseKind::Postgresql,
            quote: ('"', '"'),
            param: ParamStyle::DollarNumbered,
            limit: LimitStyle::Limit,
            json: JsonStyle::PostgresJson,
            returning: ReturningStyle::Returning,
            upsert: UpsertStyle::OnConflict,
        }
    }

    /// MySQL.
    #[must_use]
    pub const fn mysql() -> Self {
        Self {
            kind: DatabaseKind::Mysql,
            quote: ('`', '`'),
            param: ParamStyle::Question,
            limit: LimitStyle::Limit,
            json: JsonStyle::MysqlJson,
            returning: ReturningStyle::None,
            upsert: UpsertStyle::OnDuplicateKey,
        }
    }

    /// Record for a configured database kind.
    ///
    /// # Errors
    ///
    /// Document kinds have no SQL dialect; asking for one is an
    /// initialization error.
    pub fn for_kind(kind: DatabaseKind) -> Result<Self> {
        match kind {
            DatabaseKind::Mssql => Ok(Self::mssql()),
            DatabaseKind::Dwsql => Ok(Self {
                kind: DatabaseKind::Dwsql,
                ..Self::mssql()
            }),
            DatabaseKind::Postgresql => Ok(Self::postgres()),
            DatabaseKind::Mysql => Ok(Self::mysql()),
            DatabaseKind::CosmosSql | DatabaseKind::CosmosNosql => Err(VeneerError::init(
                "Document database kinds are not served by the SQL renderer",
            )),
        }
    }

    /// Quote an identifier, splitting on `.` so schema-qualified names
    /// quote each part (`dbo.books` becomes `[dbo].[books]`).
    #[must_use]
    pub fn quote_ident(&self, ident: &str) -> String {
        let (open, close) = self.quote;
        ident
            .split('.')
            .map(|part| {
                // Doubled closing quotes escape embedded ones.
                let escaped = part.replace(close, &format!("{close}{close}"));
                format!("{open}{escaped}{close}")
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Placeholder text for the parameter at `index`.
    #[must_use]
    pub fn placeholder(&self, index: usize) -> String {
        match self.param {
            ParamStyle::AtNumbered => format!("@p{index}"),
            ParamStyle::DollarNumbered => format!("${}", index + 1),
            ParamStyle::Question => "?".to_string(),
        }
    }

    /// Canonical parameter name at `index` (stable across styles, used in
    /// the binding table).
    #[must_use]
    pub fn param_name(index: usize) -> String {
        format!("@p{index}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_follows_dialect() {
        assert_eq!(Dialect::mssql().quote_ident("dbo.books"), "[dbo].[books]");
        assert_eq!(Dialect::postgres().quote_ident("books"), "\"books\"");
        assert_eq!(Dialect::mysql().quote_ident("books"), "`books`");
    }

    #[test]
    fn embedded_quote_is_doubled() {
        assert_eq!(Dialect::mssql().quote_ident("we]ird"), "[we]]ird]");
        assert_eq!(Dialect::postgres().quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn placeholders_follow_dialect() {
        assert_eq!(Dialect::mssql().placeholder(0), "@p0");
        assert_eq!(Dialect::postgres().placeholder(0), "$1");
        assert_eq!(Dialect::postgres().placeholder(2), "$3");
        assert_eq!(Dialect::mysql().placeholder(5), "?");
    }

    #[test]
    fn dwsql_reuses_the_mssql_surface() {
        let dialect = Dialect::for_kind(DatabaseKind::Dwsql).expect("dialect");
        assert_eq!(dialect.json, JsonStyle::ForJsonPath);
        assert_eq!(dialect.kind, DatabaseKind::Dwsql);
    }

    #[test]
    fn document_kinds_have_no_sql_dialect() {
        assert!(Dialect::for_kind(DatabaseKind::CosmosNosql).is_err());
    }
}
