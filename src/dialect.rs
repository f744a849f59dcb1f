//! Database dialect detection.
//!
//! Maps a connection URL onto a closed set of dialect tags. Each tag carries
//! a display name and a default driver hint used when a datasource does not
//! configure a driver explicitly.

use serde::Serialize;

/// The kind of database server a connection URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    MySql,
    PostgreSql,
    Oracle,
    SqlServer,
    H2,
    IoTdb,
    SQLite,
    /// Unrecognized scheme. Still carries the MySQL driver hint so downstream
    /// code always has something to try.
    Unknown,
}

/// Ordered scheme-prefix table. First match wins.
const SCHEME_TABLE: &[(&str, Dialect)] = &[
    ("postgresql:", Dialect::PostgreSql),
    ("postgres:", Dialect::PostgreSql),
    ("mysql:", Dialect::MySql),
    ("oracle:", Dialect::Oracle),
    ("sqlserver:", Dialect::SqlServer),
    ("h2:", Dialect::H2),
    ("iotdb:", Dialect::IoTdb),
    ("sqlite:", Dialect::SQLite),
];

impl Dialect {
    /// Detect the dialect from a connection URL.
    ///
    /// Matching is case-insensitive on the scheme prefix. Blank input and
    /// unrecognized schemes yield [`Dialect::Unknown`]. Referentially
    /// transparent; no side effects.
    pub fn detect(url: &str) -> Self {
        let lower = url.trim().to_lowercase();
        if lower.is_empty() {
            return Dialect::Unknown;
        }
        for (prefix, dialect) in SCHEME_TABLE {
            if lower.starts_with(prefix) {
                return *dialect;
            }
        }
        Dialect::Unknown
    }

    /// Human-readable name for introspection payloads.
    pub fn display_name(&self) -> &'static str {
        match self {
            Dialect::MySql => "MySQL",
            Dialect::PostgreSql => "PostgreSQL",
            Dialect::Oracle => "Oracle",
            Dialect::SqlServer => "SQL Server",
            Dialect::H2 => "H2",
            Dialect::IoTdb => "Apache IoTDB",
            Dialect::SQLite => "SQLite",
            Dialect::Unknown => "Unknown",
        }
    }

    /// Default driver hint for datasources that do not configure one.
    ///
    /// Unknown deliberately reports the MySQL driver so that an unrecognized
    /// URL still gets a connection attempt rather than an immediate rejection.
    pub fn driver_hint(&self) -> &'static str {
        match self {
            Dialect::MySql | Dialect::Unknown => "mysql",
            Dialect::PostgreSql => "postgres",
            Dialect::Oracle => "oracle",
            Dialect::SqlServer => "sqlserver",
            Dialect::H2 => "h2",
            Dialect::IoTdb => "iotdb",
            Dialect::SQLite => "sqlite",
        }
    }

    /// Whether this dialect has a native driver in the bundled stack.
    pub fn natively_supported(&self) -> bool {
        matches!(self, Dialect::MySql | Dialect::PostgreSql | Dialect::SQLite)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
