//! Declarative schema: column types, table/index declarations and the compiler
//! that turns them into engine creation commands.

mod column;
mod compiler;
mod declaration;

pub use column::{ColumnType, Tuple, Value, check_tuple, display_tuple};
pub use compiler::{
    CreateCommand, CreateIndex, CreateTable, CursorTarget, SchemaPlan, compile, index_cursor_uri,
    parse_cursor_uri,
};
pub use declaration::{ColumnDecl, IndexDecl, TableDecl};

pub(crate) use compiler::ensure_identifier;
