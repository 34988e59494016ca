//! Runtime and adapter configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How a dialect limits and offsets a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PagingStyle {
    /// `LIMIT n OFFSET m`.
    LimitOffset,
    /// `OFFSET m ROWS FETCH NEXT n ROWS ONLY`.
    OffsetFetch,
    /// `ROW_NUMBER() OVER (...)` wrapped in a subselect.
    RowNumber,
    /// No SQL paging; rows are skipped and truncated while reading.
    None,
}

/// How identifiers are quoted in generated SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentifierQuoting {
    /// Identifiers are emitted as mapped.
    None,
    /// `"NAME"`.
    DoubleQuote,
    /// `[NAME]`.
    Brackets,
    /// `` `NAME` ``.
    Backtick,
}

/// How a case-insensitive `LIKE` is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LikeStyle {
    /// `UPPER(col) LIKE UPPER(?)`.
    Upper,
    /// `col ILIKE ?`.
    ILike,
}

/// Capability descriptor of a database adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterCapabilities {
    /// Adapter name; selects per-adapter SQL template overrides.
    pub name: String,
    /// The driver reports keys generated by inserts.
    pub supports_generated_keys: bool,
    /// The driver can execute one statement for many binding rows.
    pub supports_batch_updates: bool,
    /// Paging strategy.
    pub paging: PagingStyle,
    /// `OFFSET` is only valid after a `LIMIT` clause.
    pub offset_requires_limit: bool,
    /// Identifier quoting.
    pub quoting: IdentifierQuoting,
    /// Case-insensitive `LIKE` rendering.
    pub like_ignore_case: LikeStyle,
    /// Expression function name to SQL function name.
    pub functions: BTreeMap<String, String>,
    /// OUT parameters may be read before result sets are drained.
    pub out_params_before_results: bool,
    /// Maximum number of ids in one `IN` qualifier.
    pub max_id_qualifier_size: usize,
}

fn standard_functions() -> BTreeMap<String, String> {
    [
        ("upper", "UPPER"),
        ("lower", "LOWER"),
        ("length", "LENGTH"),
        ("trim", "TRIM"),
        ("abs", "ABS"),
        ("substring", "SUBSTR"),
        ("concat", "CONCAT"),
        ("mod", "MOD"),
        ("count", "COUNT"),
        ("sum", "SUM"),
        ("min", "MIN"),
        ("max", "MAX"),
        ("avg", "AVG"),
        ("current_timestamp", "CURRENT_TIMESTAMP"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl AdapterCapabilities {
    /// SQL-92 leaning defaults.
    pub fn generic() -> Self {
        Self {
            name: "generic".into(),
            supports_generated_keys: false,
            supports_batch_updates: false,
            paging: PagingStyle::None,
            offset_requires_limit: false,
            quoting: IdentifierQuoting::None,
            like_ignore_case: LikeStyle::Upper,
            functions: standard_functions(),
            out_params_before_results: false,
            max_id_qualifier_size: 1000,
        }
    }

    /// SQLite.
    pub fn sqlite() -> Self {
        let mut functions = standard_functions();
        functions.remove("concat");
        functions.remove("mod");
        Self {
            name: "sqlite".into(),
            supports_generated_keys: true,
            supports_batch_updates: true,
            paging: PagingStyle::LimitOffset,
            offset_requires_limit: true,
            functions,
            max_id_qualifier_size: 999,
            ..Self::generic()
        }
    }

    /// PostgreSQL.
    pub fn postgres() -> Self {
        Self {
            name: "postgres".into(),
            supports_generated_keys: true,
            supports_batch_updates: true,
            paging: PagingStyle::LimitOffset,
            quoting: IdentifierQuoting::DoubleQuote,
            like_ignore_case: LikeStyle::ILike,
            ..Self::generic()
        }
    }

    /// Microsoft SQL Server.
    pub fn sqlserver() -> Self {
        let mut functions = standard_functions();
        functions.insert("length".into(), "LEN".into());
        functions.insert("substring".into(), "SUBSTRING".into());
        Self {
            name: "sqlserver".into(),
            supports_generated_keys: true,
            supports_batch_updates: true,
            paging: PagingStyle::OffsetFetch,
            quoting: IdentifierQuoting::Brackets,
            functions,
            out_params_before_results: false,
            max_id_qualifier_size: 2000,
            ..Self::generic()
        }
    }

    /// Set the paging style.
    pub fn with_paging(mut self, paging: PagingStyle) -> Self {
        self.paging = paging;
        self
    }

    /// Set identifier quoting.
    pub fn with_quoting(mut self, quoting: IdentifierQuoting) -> Self {
        self.quoting = quoting;
        self
    }

    /// Map an expression function name to a SQL function.
    pub fn with_function(mut self, name: impl Into<String>, sql: impl Into<String>) -> Self {
        self.functions.insert(name.into(), sql.into());
        self
    }

    /// Declare whether OUT parameters are readable before results are drained.
    pub fn with_out_params_before_results(mut self, value: bool) -> Self {
        self.out_params_before_results = value;
        self
    }

    /// Declare batch update support.
    pub fn with_batch_updates(mut self, value: bool) -> Self {
        self.supports_batch_updates = value;
        self
    }

    /// Declare generated key support.
    pub fn with_generated_keys(mut self, value: bool) -> Self {
        self.supports_generated_keys = value;
        self
    }

    /// Quote an identifier. Dotted names are quoted per part.
    pub fn quote(&self, identifier: &str) -> String {
        let (open, close) = match self.quoting {
            IdentifierQuoting::None => return identifier.to_string(),
            IdentifierQuoting::DoubleQuote => ("\"", "\""),
            IdentifierQuoting::Brackets => ("[", "]"),
            IdentifierQuoting::Backtick => ("`", "`"),
        };
        identifier
            .split('.')
            .map(|part| format!("{open}{part}{close}"))
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl Default for AdapterCapabilities {
    fn default() -> Self {
        Self::generic()
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Database adapter capabilities.
    pub adapter: AdapterCapabilities,
    /// Page size used by incremental fault lists when the query sets none.
    pub default_page_size: usize,
    /// Maximum number of cached query results per cache.
    pub query_cache_capacity: usize,
    /// Log every executed statement at debug level.
    pub log_sql: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            adapter: AdapterCapabilities::generic(),
            default_page_size: 50,
            query_cache_capacity: 1000,
            log_sql: true,
        }
    }
}

impl RuntimeConfig {
    /// Create a configuration for the given adapter.
    pub fn new(adapter: AdapterCapabilities) -> Self {
        Self {
            adapter,
            ..Default::default()
        }
    }

    /// Load from a JSON document. Missing fields take default values.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the adapter capabilities.
    pub fn adapter(mut self, adapter: AdapterCapabilities) -> Self {
        self.adapter = adapter;
        self
    }

    /// Set the default page size.
    pub fn default_page_size(mut self, size: usize) -> Self {
        self.default_page_size = size;
        self
    }

    /// Set the query cache capacity.
    pub fn query_cache_capacity(mut self, capacity: usize) -> Self {
        self.query_cache_capacity = capacity;
        self
    }

    /// Enable or disable SQL logging.
    pub fn log_sql(mut self, enabled: bool) -> Self {
        self.log_sql = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let sqlite = AdapterCapabilities::sqlite();
        assert_eq!(sqlite.paging, PagingStyle::LimitOffset);
        assert!(sqlite.offset_requires_limit);

        let mssql = AdapterCapabilities::sqlserver();
        assert_eq!(mssql.functions.get("length").map(String::as_str), Some("LEN"));
        assert_eq!(mssql.quote("dbo.ARTIST"), "[dbo].[ARTIST]");

        assert_eq!(AdapterCapabilities::postgres().quote("ARTIST"), "\"ARTIST\"");
        assert_eq!(AdapterCapabilities::generic().quote("ARTIST"), "ARTIST");
    }

    #[test]
    fn test_config_from_json_fills_defaults() {
        let config = RuntimeConfig::from_json(r#"{ "default_page_size": 10 }"#).unwrap();
        assert_eq!(config.default_page_size, 10);
        assert_eq!(config.query_cache_capacity, 1000);
        assert_eq!(config.adapter.name, "generic");
    }

    #[test]
    fn test_config_builder() {
        let config = RuntimeConfig::new(AdapterCapabilities::sqlite())
            .default_page_size(5)
            .log_sql(false);
        assert_eq!(config.adapter.name, "sqlite");
        assert_eq!(config.default_page_size, 5);
        assert!(!config.log_sql);
    }
}
