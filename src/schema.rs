//! Introspected database structure
//!
//! A [`Schema`] lists the user tables of a database in catalog order, each
//! with its columns in definition order. Clients render tables and columns
//! in exactly this order, so the serialized form is a JSON object whose keys
//! keep catalog order rather than being sorted.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// Prefix the engine reserves for its own bookkeeping tables.
pub const INTERNAL_TABLE_PREFIX: &str = "sqlite_";

/// One column of a table, as declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub declared_type: String,
    pub notnull: bool,
    pub pk: bool,
}

/// A foreign-key edge from `table.column` to `references_table.references_column`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            name: name.into(),
            columns,
            foreign_keys: Vec::new(),
        }
    }

}

/// All user tables of a database, in catalog order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    tables: Vec<TableSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a table, skipping engine-internal names.
    pub fn push(&mut self, table: TableSchema) {
        if is_internal_table(&table.name) {
            return;
        }
        self.tables.push(table);
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    /// Look up a table by name. SQLite identifiers are case-insensitive
    /// for ASCII letters, so `USERS` finds `users`.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Render the schema as `CREATE TABLE` statements.
    ///
    /// This is the schema description handed to text-to-SQL prompts.
    pub fn to_ddl(&self) -> String {
        let mut out = Vec::with_capacity(self.tables.len());
        for table in &self.tables {
            let columns: Vec<String> = table
                .columns
                .iter()
                .map(|col| {
                    let mut line = format!("  {} {}", col.name, col.declared_type);
                    if col.pk {
                        line.push_str(" PRIMARY KEY");
                    }
                    if col.notnull {
                        line.push_str(" NOT NULL");
                    }
                    line.trim_end().to_string()
                })
                .collect();
            out.push(format!(
                "CREATE TABLE {} (\n{}\n);",
                table.name,
                columns.join(",\n")
            ));
        }
        out.join("\n\n")
    }

    /// Render the schema as a Mermaid `erDiagram`.
    pub fn to_mermaid(&self) -> String {
        let mut lines = vec!["erDiagram".to_string()];

        for table in &self.tables {
            let fk_columns: Vec<&str> = table
                .foreign_keys
                .iter()
                .map(|fk| fk.column.as_str())
                .collect();

            lines.push(format!("    {} {{", mermaid_ident(&table.name)));
            for col in &table.columns {
                let mut keys = Vec::new();
                if col.pk {
                    keys.push("PK");
                }
                if fk_columns.contains(&col.name.as_str()) {
                    keys.push("FK");
                }
                let type_name = if col.declared_type.trim().is_empty() {
                    "ANY".to_string()
                } else {
                    mermaid_ident(&col.declared_type)
                };
                let mut line = format!("        {} {}", type_name, mermaid_ident(&col.name));
                if !keys.is_empty() {
                    line.push(' ');
                    line.push_str(&keys.join(","));
                }
                lines.push(line);
            }
            lines.push("    }".to_string());
        }

        for table in &self.tables {
            for fk in &table.foreign_keys {
                lines.push(format!(
                    "    {} }}o--|| {} : \"{}\"",
                    mermaid_ident(&table.name),
                    mermaid_ident(&fk.references_table),
                    fk.column.replace('"', "'")
                ));
            }
        }

        lines.join("\n")
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.tables.len()))?;
        for table in &self.tables {
            map.serialize_entry(&table.name, &table.columns)?;
        }
        map.end()
    }
}

pub fn is_internal_table(name: &str) -> bool {
    name.starts_with(INTERNAL_TABLE_PREFIX)
}

/// Quote an identifier for interpolation into SQL.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// Mermaid identifiers cannot contain whitespace or punctuation.
fn mermaid_ident(name: &str) -> String {
    let ident: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if ident.is_empty() {
        "_".to_string()
    } else {
        ident
    }
}
