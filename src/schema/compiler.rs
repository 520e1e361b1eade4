//! Compile table/index declarations into physical creation commands.
//!
//! A compiled table carries a key format (one code per key column), a value
//! format (one code per value column) and the flat column list, key columns
//! first. An index carries only its key columns; its projection is chosen
//! when a cursor is opened, through the cursor URI.
//!
//! Compilation is deterministic: the same declarations always produce the
//! same command strings, so plans can be compared and re-applied.

use std::fmt;

use ahash::AHashSet;

use crate::engine::Session;
use crate::errors::AtomGraphError;

use super::column::ColumnType;
use super::declaration::{IndexDecl, TableDecl};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateTable {
    pub name: String,
    pub key_format: String,
    pub value_format: String,
    pub columns: Vec<String>,
}

impl CreateTable {
    pub fn uri(&self) -> String {
        format!("table:{}", self.name)
    }

    pub fn config(&self) -> String {
        format!(
            "key_format={},value_format={},columns=({})",
            self.key_format,
            self.value_format,
            self.columns.join(",")
        )
    }

    pub fn key_types(&self) -> Result<Vec<ColumnType>, AtomGraphError> {
        ColumnType::parse_format(&self.key_format)
    }

    pub fn value_types(&self) -> Result<Vec<ColumnType>, AtomGraphError> {
        ColumnType::parse_format(&self.value_format)
    }

    pub fn key_columns(&self) -> &[String] {
        &self.columns[..self.key_format.chars().count()]
    }

    pub fn value_columns(&self) -> &[String] {
        &self.columns[self.key_format.chars().count()..]
    }

    pub fn is_append(&self) -> bool {
        self.key_format == "r"
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateIndex {
    pub table: String,
    pub name: String,
    pub columns: Vec<String>,
}

impl CreateIndex {
    pub fn uri(&self) -> String {
        format!("index:{}:{}", self.table, self.name)
    }

    pub fn config(&self) -> String {
        format!("columns=({})", self.columns.join(","))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreateCommand {
    Table(CreateTable),
    Index(CreateIndex),
}

impl fmt::Display for CreateCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreateCommand::Table(t) => write!(f, "create {} {}", t.uri(), t.config()),
            CreateCommand::Index(i) => write!(f, "create {} {}", i.uri(), i.config()),
        }
    }
}

/// Ordered list of creation commands: each table followed by its indices.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchemaPlan {
    pub commands: Vec<CreateCommand>,
}

impl SchemaPlan {
    pub fn tables(&self) -> impl Iterator<Item = &CreateTable> {
        self.commands.iter().filter_map(|cmd| match cmd {
            CreateCommand::Table(t) => Some(t),
            CreateCommand::Index(_) => None,
        })
    }

    pub fn indices(&self) -> impl Iterator<Item = &CreateIndex> {
        self.commands.iter().filter_map(|cmd| match cmd {
            CreateCommand::Index(i) => Some(i),
            CreateCommand::Table(_) => None,
        })
    }

    /// One rendered line per command.
    pub fn to_strings(&self) -> Vec<String> {
        self.commands.iter().map(ToString::to_string).collect()
    }

    /// Run every command against `session`, in order.
    pub fn apply(&self, session: &mut dyn Session) -> Result<(), AtomGraphError> {
        for cmd in &self.commands {
            match cmd {
                CreateCommand::Table(t) => session.create_table(t)?,
                CreateCommand::Index(i) => session.create_index(i)?,
            }
        }
        tracing::debug!(commands = self.commands.len(), "schema applied");
        Ok(())
    }
}

pub fn compile(tables: &[TableDecl]) -> Result<SchemaPlan, AtomGraphError> {
    validate(tables)?;
    let mut commands = Vec::new();
    for table in tables {
        commands.push(CreateCommand::Table(compile_table(table)));
        for index in &table.indices {
            commands.push(CreateCommand::Index(CreateIndex {
                table: table.name.clone(),
                name: index.name.clone(),
                columns: index.columns.clone(),
            }));
        }
    }
    Ok(SchemaPlan { commands })
}

fn compile_table(table: &TableDecl) -> CreateTable {
    CreateTable {
        name: table.name.clone(),
        key_format: table.key.iter().map(|c| c.ty.format_code()).collect(),
        value_format: table.value.iter().map(|c| c.ty.format_code()).collect(),
        columns: table.columns().map(|c| c.name.clone()).collect(),
    }
}

/// Cursor URI for an index: the projected columns, if any, are appended in parentheses.
pub fn index_cursor_uri(table: &str, index: &IndexDecl) -> String {
    if index.projection.is_empty() {
        format!("index:{table}:{}", index.name)
    } else {
        format!("index:{table}:{}({})", index.name, index.projection.join(","))
    }
}

/// What a cursor URI points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CursorTarget {
    Table(String),
    Index {
        table: String,
        index: String,
        projection: Vec<String>,
    },
}

pub fn parse_cursor_uri(uri: &str) -> Result<CursorTarget, AtomGraphError> {
    if let Some(name) = uri.strip_prefix("table:") {
        ensure_identifier(name, "table")?;
        return Ok(CursorTarget::Table(name.to_string()));
    }
    let rest = uri
        .strip_prefix("index:")
        .ok_or_else(|| AtomGraphError::invalid_input(format!("unsupported cursor uri '{uri}'")))?;
    let (table, index_part) = rest
        .split_once(':')
        .ok_or_else(|| AtomGraphError::invalid_input(format!("index uri '{uri}' has no index name")))?;
    let (index, projection) = match index_part.split_once('(') {
        Some((name, cols)) => {
            let cols = cols.strip_suffix(')').ok_or_else(|| {
                AtomGraphError::invalid_input(format!("unterminated projection in '{uri}'"))
            })?;
            let projection: Vec<String> = cols.split(',').map(|c| c.trim().to_string()).collect();
            (name, projection)
        }
        None => (index_part, Vec::new()),
    };
    ensure_identifier(table, "table")?;
    ensure_identifier(index, "index")?;
    for col in &projection {
        ensure_identifier(col, "column")?;
    }
    Ok(CursorTarget::Index {
        table: table.to_string(),
        index: index.to_string(),
        projection,
    })
}

fn validate(tables: &[TableDecl]) -> Result<(), AtomGraphError> {
    let mut table_names = AHashSet::new();
    for table in tables {
        ensure_identifier(&table.name, "table")?;
        if !table_names.insert(table.name.as_str()) {
            return Err(AtomGraphError::schema(format!(
                "table '{}' declared twice",
                table.name
            )));
        }
        validate_columns(table)?;
        validate_indices(table)?;
    }
    Ok(())
}

fn validate_columns(table: &TableDecl) -> Result<(), AtomGraphError> {
    if table.key.is_empty() {
        return Err(AtomGraphError::schema(format!(
            "table '{}' has no key columns",
            table.name
        )));
    }
    let mut seen = AHashSet::new();
    for column in table.columns() {
        ensure_identifier(&column.name, "column")?;
        if !seen.insert(column.name.as_str()) {
            return Err(AtomGraphError::schema(format!(
                "column '{}' appears more than once in table '{}'",
                column.name, table.name
            )));
        }
    }
    let record_columns = table
        .columns()
        .filter(|c| c.ty == ColumnType::RecordId)
        .count();
    if record_columns > 0 && !(record_columns == 1 && table.is_append()) {
        return Err(AtomGraphError::schema(format!(
            "table '{}': a record id column must be the only key column",
            table.name
        )));
    }
    Ok(())
}

fn validate_indices(table: &TableDecl) -> Result<(), AtomGraphError> {
    let mut index_names = AHashSet::new();
    for index in &table.indices {
        ensure_identifier(&index.name, "index")?;
        if index.name == "append" {
            return Err(AtomGraphError::schema(format!(
                "table '{}': index name 'append' is reserved",
                table.name
            )));
        }
        if !index_names.insert(index.name.as_str()) {
            return Err(AtomGraphError::schema(format!(
                "index '{}' declared twice on table '{}'",
                index.name, table.name
            )));
        }
        if index.columns.is_empty() {
            return Err(AtomGraphError::schema(format!(
                "index '{}' on table '{}' has no columns",
                index.name, table.name
            )));
        }
        for col in index.columns.iter().chain(&index.projection) {
            if table.column(col).is_none() {
                return Err(AtomGraphError::schema(format!(
                    "index '{}' references unknown column '{col}' of table '{}'",
                    index.name, table.name
                )));
            }
        }
    }
    Ok(())
}

pub(crate) fn ensure_identifier(name: &str, what: &str) -> Result<(), AtomGraphError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AtomGraphError::schema(format!("invalid {what} name '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arrows() -> TableDecl {
        TableDecl::new("arrows")
            .key("id", ColumnType::RecordId)
            .value("start", ColumnType::UInt)
            .value("end", ColumnType::UInt)
            .index(IndexDecl::new("outgoing", ["start"]).project(["id", "end"]))
            .index(IndexDecl::new("incoming", ["end"]).project(["id", "start"]))
    }

    #[test]
    fn test_compile_renders_commands() {
        let plan = compile(&[arrows()]).unwrap();
        assert_eq!(
            plan.to_strings(),
            vec![
                "create table:arrows key_format=r,value_format=QQ,columns=(id,start,end)",
                "create index:arrows:outgoing columns=(start)",
                "create index:arrows:incoming columns=(end)",
            ]
        );
    }

    #[test]
    fn test_overlapping_key_and_value_names_rejected() {
        let table = TableDecl::new("t")
            .key("a", ColumnType::Int)
            .value("a", ColumnType::Str);
        assert!(matches!(
            compile(&[table]),
            Err(AtomGraphError::SchemaError(_))
        ));
    }

    #[test]
    fn test_record_id_must_be_sole_key() {
        let table = TableDecl::new("t")
            .key("id", ColumnType::RecordId)
            .key("b", ColumnType::Int);
        assert!(compile(&[table]).is_err());
        let table = TableDecl::new("t")
            .key("a", ColumnType::Int)
            .value("id", ColumnType::RecordId);
        assert!(compile(&[table]).is_err());
    }

    #[test]
    fn test_index_cursor_uri_suffix() {
        let bare = IndexDecl::new("by_name", ["name"]);
        assert_eq!(index_cursor_uri("people", &bare), "index:people:by_name");
        let projected = bare.clone().project(["id", "age"]);
        assert_eq!(
            index_cursor_uri("people", &projected),
            "index:people:by_name(id,age)"
        );
        assert_eq!(
            parse_cursor_uri("index:people:by_name(id,age)").unwrap(),
            CursorTarget::Index {
                table: "people".into(),
                index: "by_name".into(),
                projection: vec!["id".into(), "age".into()],
            }
        );
    }

    #[test]
    fn test_invalid_identifiers_rejected() {
        assert!(compile(&[TableDecl::new("bad name").key("a", ColumnType::Int)]).is_err());
        assert!(parse_cursor_uri("table:").is_err());
        assert!(parse_cursor_uri("file:atoms").is_err());
    }
}
