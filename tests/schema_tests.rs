use std::sync::Arc;

use atomgraph::schema::{CreateCommand, compile};
use atomgraph::{
    AtomGraphError, ColumnType, CursorMode, Engine, IndexDecl, MemoryEngine, SqliteConfig,
    SqliteEngine, TableDecl, Value,
};

fn engines() -> Vec<Arc<dyn Engine>> {
    vec![
        Arc::new(MemoryEngine::new()),
        Arc::new(SqliteEngine::open_in_memory(&SqliteConfig::default()).expect("sqlite engine")),
    ]
}

fn wide_table() -> TableDecl {
    TableDecl::new("events")
        .key("source", ColumnType::Str)
        .key("seq", ColumnType::UInt)
        .key("offset", ColumnType::Int)
        .value("payload", ColumnType::Bytes)
        .value("kind", ColumnType::Str)
        .index(IndexDecl::new("by_kind", ["kind"]))
}

#[test]
fn test_formats_follow_declaration_order() {
    let plan = compile(&[wide_table()]).expect("compile");
    let table = plan.tables().next().expect("table command");
    assert_eq!(table.key_format, "SQq");
    assert_eq!(table.value_format, "uS");
    assert_eq!(
        table.columns,
        vec!["source", "seq", "offset", "payload", "kind"]
    );
    assert_eq!(table.key_format.len() + table.value_format.len(), table.columns.len());
}

#[test]
fn test_compile_is_deterministic() {
    let first = compile(&[wide_table()]).expect("compile").to_strings();
    let second = compile(&[wide_table()]).expect("compile").to_strings();
    assert_eq!(first, second);
    assert_eq!(
        first,
        vec![
            "create table:events key_format=SQq,value_format=uS,columns=(source,seq,offset,payload,kind)",
            "create index:events:by_kind columns=(kind)",
        ]
    );
}

#[test]
fn test_index_command_carries_only_index_columns() {
    let decl = TableDecl::new("people")
        .key("id", ColumnType::RecordId)
        .value("name", ColumnType::Str)
        .index(IndexDecl::new("by_name", ["name"]).project(["id"]));
    let plan = compile(&[decl]).expect("compile");
    match &plan.commands[1] {
        CreateCommand::Index(index) => {
            assert_eq!(index.columns, vec!["name"]);
            assert_eq!(index.config(), "columns=(name)");
        }
        other => panic!("expected index command, got {other}"),
    }
}

#[test]
fn test_declarations_load_from_json() {
    let decl: TableDecl = serde_json::from_str(
        r#"{
            "name": "tags",
            "key": [{"name": "atom", "type": "uint"}, {"name": "tag", "type": "string"}],
            "indices": [{"name": "by_tag", "columns": ["tag"]}]
        }"#,
    )
    .expect("parse declaration");
    assert!(decl.value.is_empty());
    let plan = compile(&[decl]).expect("compile");
    assert_eq!(
        plan.to_strings(),
        vec![
            "create table:tags key_format=QS,value_format=,columns=(atom,tag)",
            "create index:tags:by_tag columns=(tag)",
        ]
    );
}

#[test]
fn test_unknown_type_symbol_fails_to_load() {
    let parsed: Result<TableDecl, _> = serde_json::from_str(
        r#"{"name": "t", "key": [{"name": "a", "type": "float"}]}"#,
    );
    assert!(parsed.is_err());
}

#[test]
fn test_duplicate_tables_rejected() {
    let t = TableDecl::new("t").key("a", ColumnType::Int);
    let err = compile(&[t.clone(), t]).unwrap_err();
    assert!(matches!(err, AtomGraphError::SchemaError(_)));
}

#[test]
fn test_index_on_unknown_column_rejected() {
    let t = TableDecl::new("t")
        .key("a", ColumnType::Int)
        .index(IndexDecl::new("by_b", ["b"]));
    assert!(matches!(
        compile(&[t]),
        Err(AtomGraphError::SchemaError(_))
    ));
}

#[test]
fn test_reserved_index_name_rejected() {
    let t = TableDecl::new("t")
        .key("a", ColumnType::Int)
        .index(IndexDecl::new("append", ["a"]));
    assert!(compile(&[t]).is_err());
}

#[test]
fn test_apply_twice_is_idempotent() {
    for engine in engines() {
        let plan = compile(&[wide_table()]).expect("compile");
        let mut session = engine.open_session().expect("session");
        plan.apply(session.as_mut()).expect("first apply");
        plan.apply(session.as_mut()).expect("second apply");

        let mut cursor = session
            .open_cursor("table:events", CursorMode::Standard)
            .expect("cursor");
        cursor.set_key(vec![
            Value::Str("node-a".into()),
            Value::UInt(1),
            Value::Int(-4),
        ]);
        cursor.set_value(vec![Value::Bytes(vec![1, 2]), Value::Str("tick".into())]);
        cursor.insert().expect("insert");
        plan.apply(session.as_mut()).expect("apply after insert");
        cursor.reset().expect("reset");
        assert!(cursor.next().expect("next"), "{} lost its row", engine.name());
    }
}

#[test]
fn test_conflicting_layout_is_already_exists() {
    for engine in engines() {
        let mut session = engine.open_session().expect("session");
        compile(&[TableDecl::new("t").key("a", ColumnType::Int)])
            .expect("compile")
            .apply(session.as_mut())
            .expect("apply");
        let err = compile(&[TableDecl::new("t").key("a", ColumnType::Str)])
            .expect("compile")
            .apply(session.as_mut())
            .unwrap_err();
        assert!(
            matches!(err, AtomGraphError::AlreadyExists(_)),
            "{}: {err}",
            engine.name()
        );
    }
}
