use std::sync::Arc;

use atomgraph::{
    Atom, AtomGraphError, Engine, Graph, GraphConfig, MemoryEngine, SqliteConfig, SqliteEngine,
};
use serde_json::json;

fn engines() -> Vec<Arc<dyn Engine>> {
    vec![
        Arc::new(MemoryEngine::new()),
        Arc::new(SqliteEngine::open_in_memory(&SqliteConfig::default()).expect("sqlite engine")),
    ]
}

fn graphs() -> Vec<(Arc<dyn Engine>, Graph)> {
    engines()
        .into_iter()
        .map(|engine| {
            let graph = Graph::open(engine.as_ref(), &GraphConfig::default()).expect("graph");
            (engine, graph)
        })
        .collect()
}

fn named(graph: &mut Graph, name: &str) -> Atom {
    graph
        .save(&Atom::new().set("name", name))
        .expect("save atom")
}

fn names(atoms: &[Atom]) -> Vec<String> {
    atoms
        .iter()
        .map(|atom| atom.get("name").and_then(|v| v.as_str()).unwrap_or("?").to_string())
        .collect()
}

#[test]
fn test_save_then_get_round_trip() {
    for (engine, mut graph) in graphs() {
        let atom = Atom::new()
            .set("name", "alpha")
            .set("weight", 3)
            .set("tags", json!(["x", "y"]));
        let saved = graph.save(&atom).expect("save");
        let id = saved.id().expect("id assigned");
        assert_eq!(saved.properties(), atom.properties());
        let loaded = graph.get(id).expect("get");
        assert_eq!(loaded, saved, "{}", engine.name());
    }
}

#[test]
fn test_save_assigns_increasing_ids() {
    for (_engine, mut graph) in graphs() {
        let a = named(&mut graph, "a").id().expect("id");
        let b = named(&mut graph, "b").id().expect("id");
        assert!(a < b);
    }
}

#[test]
fn test_save_with_id_replaces_properties() {
    for (engine, mut graph) in graphs() {
        let saved = named(&mut graph, "before");
        let changed = saved.set("name", "after").set("extra", true);
        let resaved = graph.save(&changed).expect("resave");
        assert_eq!(resaved.id(), saved.id());
        let loaded = graph.get(saved.id().expect("id")).expect("get");
        assert_eq!(loaded.get("name"), Some(&json!("after")), "{}", engine.name());
        assert_eq!(loaded.get("extra"), Some(&json!(true)));
    }
}

#[test]
fn test_set_twice_keeps_one_entry() {
    for (_engine, mut graph) in graphs() {
        let atom = named(&mut graph, "x").set("k", 1).set("k", 1);
        let with_k: Vec<_> = atom.properties().iter().filter(|(k, _)| k == "k").collect();
        assert_eq!(with_k.len(), 1);
        let saved = graph.save(&atom).expect("save");
        let loaded = graph.get(saved.id().expect("id")).expect("get");
        assert_eq!(loaded.properties().len(), 2);
        assert_eq!(loaded.get("k"), Some(&json!(1)));
    }
}

#[test]
fn test_link_and_neighbors_then_delete() {
    for (engine, mut graph) in graphs() {
        let a = named(&mut graph, "A");
        let b = named(&mut graph, "B");
        let c = named(&mut graph, "C");
        graph.link(&a, &b).expect("link a->b");
        graph.link(&a, &c).expect("link a->c");

        assert_eq!(names(&graph.outgoing(&a).expect("outgoing")), vec!["B", "C"]);
        assert_eq!(names(&graph.incoming(&b).expect("incoming b")), vec!["A"]);
        assert_eq!(names(&graph.incoming(&c).expect("incoming c")), vec!["A"]);

        assert_eq!(graph.delete(&a).expect("delete"), 2);
        assert!(graph.incoming(&b).expect("incoming b").is_empty(), "{}", engine.name());
        assert!(graph.incoming(&c).expect("incoming c").is_empty());
        let err = graph.get(a.id().expect("id")).unwrap_err();
        assert!(matches!(err, AtomGraphError::NotFound(_)));
    }
}

#[test]
fn test_delete_removes_only_touching_arrows() {
    for (engine, mut graph) in graphs() {
        let a = named(&mut graph, "A");
        let b = named(&mut graph, "B");
        let c = named(&mut graph, "C");
        let kept = graph.link(&b, &c).expect("link b->c");
        graph.link(&a, &b).expect("link a->b");
        graph.link(&c, &a).expect("link c->a");

        assert_eq!(graph.delete(&a).expect("delete"), 2);
        assert_eq!(graph.arrow(kept.id).expect("kept arrow"), kept);
        assert_eq!(names(&graph.outgoing(&b).expect("outgoing b")), vec!["C"]);
        assert!(graph.outgoing(&c).expect("outgoing c").is_empty(), "{}", engine.name());
        assert_eq!(names(&[graph.get(b.id().expect("id")).expect("b")]), vec!["B"]);
    }
}

#[test]
fn test_self_loop_deleted_once() {
    for (_engine, mut graph) in graphs() {
        let a = named(&mut graph, "A");
        let arrow = graph.link(&a, &a).expect("self link");
        assert_eq!(graph.delete(&a).expect("delete"), 1);
        assert!(graph.arrow(arrow.id).unwrap_err().is_not_found());
    }
}

#[test]
fn test_update_after_delete_is_not_found() {
    for (_engine, mut graph) in graphs() {
        let a = named(&mut graph, "A");
        graph.delete(&a).expect("delete");
        let err = graph.save(&a.set("name", "ghost")).unwrap_err();
        assert!(matches!(err, AtomGraphError::NotFound(_)));
        assert!(graph.delete(&a).unwrap_err().is_not_found());
    }
}

#[test]
fn test_link_requires_saved_existing_atoms() {
    for (_engine, mut graph) in graphs() {
        let a = named(&mut graph, "A");
        let unsaved = Atom::new().set("name", "draft");
        assert!(matches!(
            graph.link(&a, &unsaved),
            Err(AtomGraphError::InvalidInput(_))
        ));
        let gone = named(&mut graph, "gone");
        graph.delete(&gone).expect("delete");
        assert!(graph.link(&a, &gone).unwrap_err().is_not_found());
        assert!(graph.outgoing_arrows(&a).expect("arrows").is_empty());
    }
}

#[test]
fn test_arrows_carry_endpoints() {
    for (_engine, mut graph) in graphs() {
        let a = named(&mut graph, "A");
        let b = named(&mut graph, "B");
        let arrow = graph.link(&a, &b).expect("link");
        assert_eq!(arrow.start, a.id().expect("id"));
        assert_eq!(arrow.end, b.id().expect("id"));
        assert_eq!(graph.outgoing_arrows(&a).expect("out"), vec![arrow]);
        assert_eq!(graph.incoming_arrows(&b).expect("in"), vec![arrow]);
        assert_eq!(graph.arrow(arrow.id).expect("arrow"), arrow);
    }
}

#[test]
fn test_unlink_removes_all_parallel_arrows() {
    for (engine, mut graph) in graphs() {
        let a = named(&mut graph, "A");
        let b = named(&mut graph, "B");
        let c = named(&mut graph, "C");
        graph.link(&a, &b).expect("link");
        graph.link(&a, &c).expect("link");
        graph.link(&a, &b).expect("link");
        graph.link(&b, &a).expect("link");

        assert_eq!(graph.unlink(&a, &b).expect("unlink"), 2);
        assert_eq!(names(&graph.outgoing(&a).expect("outgoing")), vec!["C"]);
        assert_eq!(names(&graph.outgoing(&b).expect("outgoing")), vec!["A"], "{}", engine.name());
        assert_eq!(graph.unlink(&a, &b).expect("unlink again"), 0);
    }
}

#[test]
fn test_failed_transaction_discards_graph_writes() {
    for (engine, mut graph) in graphs() {
        let a = named(&mut graph, "A");
        let result: Result<(), AtomGraphError> = graph.transaction(|graph| {
            let b = named(graph, "B");
            graph.link(&a, &b)?;
            Err(AtomGraphError::invalid_input("abort"))
        });
        assert!(result.is_err());
        assert!(graph.outgoing(&a).expect("outgoing").is_empty(), "{}", engine.name());
        assert_eq!(graph.metrics_snapshot().tx_rollback_count, 1);
    }
}

#[test]
fn test_delete_inside_transaction_reuses_it() {
    for (_engine, mut graph) in graphs() {
        let a = named(&mut graph, "A");
        let b = named(&mut graph, "B");
        graph.link(&a, &b).expect("link");
        graph
            .transaction(|graph| graph.delete(&a).map(|_| ()))
            .expect("transaction");
        let snap = graph.metrics_snapshot();
        assert_eq!(snap.tx_begin_count, 1);
        assert_eq!(snap.tx_commit_count, 1);
        assert!(graph.incoming(&b).expect("incoming").is_empty());
    }
}

#[test]
fn test_sessions_share_graph_data() {
    for (engine, mut graph) in graphs() {
        let a = named(&mut graph, "shared");
        let mut other = Graph::open(engine.as_ref(), &GraphConfig::default()).expect("second graph");
        let seen = other.get(a.id().expect("id")).expect("visible to second session");
        assert_eq!(seen.get("name"), Some(&json!("shared")), "{}", engine.name());
    }
}

#[test]
fn test_atom_from_rolled_back_save_stays_dead() {
    for (engine, mut graph) in graphs() {
        let mut lost = None;
        let result: Result<(), AtomGraphError> = graph.transaction(|graph| {
            lost = Some(named(graph, "lost"));
            Err(AtomGraphError::invalid_input("abort"))
        });
        assert!(result.is_err());
        let lost = lost.expect("saved inside transaction");
        let kept = named(&mut graph, "kept");
        assert_ne!(kept.id(), lost.id(), "{}", engine.name());

        let err = graph.save(&lost.set("name", "zombie")).unwrap_err();
        assert!(err.is_not_found());
        let reloaded = graph.get(kept.id().expect("id")).expect("get");
        assert_eq!(names(&[reloaded]), vec!["kept"]);
    }
}

#[test]
fn test_unlink_runs_in_one_transaction() {
    for (engine, mut graph) in graphs() {
        let a = named(&mut graph, "A");
        let b = named(&mut graph, "B");
        graph.link(&a, &b).expect("link");
        graph.link(&a, &b).expect("link");
        graph.context().reset_metrics();

        assert_eq!(graph.unlink(&a, &b).expect("unlink"), 2);
        let snap = graph.metrics_snapshot();
        assert_eq!(snap.tx_begin_count, 1);
        assert_eq!(snap.tx_commit_count, 1);
        assert_eq!(snap.scans, 1, "{}", engine.name());

        graph.link(&a, &b).expect("link");
        let result: Result<usize, AtomGraphError> = graph.transaction(|graph| {
            graph.unlink(&a, &b)?;
            Err(AtomGraphError::invalid_input("abort"))
        });
        assert!(result.is_err());
        assert_eq!(names(&graph.outgoing(&a).expect("outgoing")), vec!["B"]);
    }
}
