mod common;

use std::sync::Arc;

use asupersync::runtime::RuntimeBuilder;
use sqlrel::prelude::*;
use sqlrel::{Phrasing, RelationErrorKind, TransactionErrorKind};

use common::{ScriptedConnector, library, rows, unwrap_outcome};

fn open(connector: &ScriptedConnector) -> (Arc<Database<Pool<ScriptedConnector>>>, Session<Pool<ScriptedConnector>>) {
    let config = DatabaseConfig::new(DialectKind::Postgres).pool(PoolConfig::new(2));
    sqlrel::open(connector.clone(), library(), &config).expect("open database")
}

fn author(id: i64, name: &str) -> Vec<Value> {
    vec![Value::Int(id), Value::from(name)]
}

fn book(id: i64, title: &str, author: i64) -> Vec<Value> {
    vec![Value::Int(id), Value::from(title), Value::Int(author), Value::Null]
}

#[test]
fn eager_level_is_one_statement_and_empty_collections_are_present() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let connector = ScriptedConnector::new();
        let authors: Vec<Vec<Value>> = (1..=20).map(|i| author(i, &format!("a{i}"))).collect();
        connector.respond("FROM \"authors\"", rows(&["id", "name"], authors));
        connector.respond(
            "FROM \"books\"",
            rows(
                &["id", "title", "author_id", "editor_id"],
                vec![book(100, "x", 1), book(101, "y", 1), book(102, "z", 7)],
            ),
        );
        let (db, mut session) = open(&connector);

        let ids = unwrap_outcome(session.fetch(&cx, &Query::select("authors").with("books")).await);
        assert_eq!(ids.len(), 20);
        assert_eq!(connector.statements().len(), 2);
        assert_eq!(connector.calls()[1].1.len(), 20);

        for (i, id) in ids.iter().enumerate() {
            let books = session.related(*id, "books").unwrap();
            match i + 1 {
                1 => assert_eq!(books.len(), 2),
                7 => assert_eq!(books.len(), 1),
                _ => assert!(books.is_empty()),
            }
        }
        let stats = db.source().stats();
        assert_eq!(stats.acquired, 2);
        assert_eq!(stats.released, 2);
        assert_eq!(stats.opened, 1);
    });
}

#[test]
fn relation_changes_flush_only_what_follows_clear() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let connector = ScriptedConnector::new();
        connector.respond("FROM \"authors\"", rows(&["id", "name"], vec![author(1, "A")]));
        connector.respond(
            "FROM \"books\"",
            rows(
                &["id", "title", "author_id", "editor_id"],
                vec![book(10, "x", 1), book(11, "y", 1)],
            ),
        );
        let (_db, mut session) = open(&connector);
        let a = unwrap_outcome(session.fetch(&cx, &Query::select("authors").with("books")).await)[0];
        let (x, y) = {
            let books = session.related(a, "books").unwrap();
            (books[0], books[1])
        };

        session.add(a, "books", x).unwrap();
        session.remove(a, "books", x).unwrap();
        session.add(a, "books", y).unwrap();
        session.clear(a, "books").unwrap();
        session.add(a, "books", x).unwrap();

        connector.fail_on("\"id\" IN", "lost connection");
        let before = connector.statements().len();
        match session.save(&cx, a).await {
            Outcome::Err(e) => assert!(e.to_string().contains("lost connection")),
            other => panic!("expected failure, got {other:?}"),
        }
        let change = session.instance(a).unwrap().pending_change("books").unwrap();
        assert!(change.clears());
        assert_eq!(change.added(), &[x]);

        unwrap_outcome(session.save(&cx, a).await);
        let retried = &connector.calls()[before + 2..];
        assert_eq!(retried.len(), 2);
        assert_eq!(
            retried[0].0,
            "UPDATE \"books\" SET \"author_id\" = $1 WHERE \"author_id\" = $2"
        );
        assert_eq!(
            retried[1].0,
            "UPDATE \"books\" SET \"author_id\" = $1 WHERE \"id\" IN ($2)"
        );
        assert_eq!(retried[1].1, vec![Value::Int(1), Value::Int(10)]);

        let settled = connector.statements().len();
        unwrap_outcome(session.save(&cx, a).await);
        assert_eq!(connector.statements().len(), settled);
    });
}

#[test]
fn nested_transaction_holds_one_connection_until_outer_commit() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let connector = ScriptedConnector::new();
        let (db, _session) = open(&connector);

        let outer = Query::begin_transaction();
        let inner = outer.begin();
        unwrap_outcome(db.execute(&cx, &outer).await);
        unwrap_outcome(db.execute(&cx, &inner).await);
        unwrap_outcome(
            db.execute(&cx, &Query::update("people").set([("age", 40)]).filter(Condition::eq("id", 1)).chain(&inner))
                .await,
        );

        let inner_commit = inner.commit();
        unwrap_outcome(db.execute(&cx, &inner_commit).await);
        assert_eq!(db.source().stats().released, 0);
        assert_eq!(db.source().stats().active_connections, 1);

        let outer_commit = inner_commit.commit();
        unwrap_outcome(db.execute(&cx, &outer_commit).await);
        let stats = db.source().stats();
        assert_eq!(stats.acquired, 1);
        assert_eq!(stats.released, 1);
        assert_eq!(
            connector.statements(),
            vec![
                "BEGIN".to_string(),
                "UPDATE \"people\" SET \"age\" = $1 WHERE \"id\" = $2".to_string(),
                "COMMIT".to_string(),
            ]
        );

        let late = Query::select("people").chain(&outer_commit);
        match db.execute(&cx, &late).await {
            Outcome::Err(e) => {
                assert_eq!(e.transaction_kind(), Some(TransactionErrorKind::Closed));
            }
            other => panic!("expected closed transaction, got {other:?}"),
        }
    });
}

#[test]
fn session_insert_uses_returning_key() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let connector = ScriptedConnector::new();
        connector.respond("INSERT INTO \"authors\"", rows(&["id"], vec![vec![Value::Int(9)]]));
        connector.respond("INSERT INTO \"books\"", rows(&["id"], vec![vec![Value::Int(30)]]));
        let (_db, mut session) = open(&connector);

        let a = session.create("author", [("name", "Jemisin")]).unwrap();
        let b = session.create("book", [("title", "The Fifth Season")]).unwrap();
        session.associate(b, "author", a).unwrap();
        assert_eq!(session.get(b, "author_id").unwrap(), Value::Null);

        unwrap_outcome(session.save(&cx, a).await);
        unwrap_outcome(session.save(&cx, b).await);
        assert_eq!(session.get(b, "author_id").unwrap(), Value::Int(9));
        assert_eq!(session.lookup("book", &Value::Int(30)), Some(b));
        let calls = connector.calls();
        assert_eq!(
            calls[1].0,
            "INSERT INTO \"books\" (\"title\", \"author_id\") VALUES ($1, $2) RETURNING \"id\""
        );
    });
}

#[test]
fn unloaded_relation_and_foreign_instances_are_errors() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let connector = ScriptedConnector::new();
        connector.respond("FROM \"authors\"", rows(&["id", "name"], vec![author(3, "C")]));
        let (_db, mut session) = open(&connector);
        let a = unwrap_outcome(session.fetch(&cx, &Query::select("authors")).await)[0];

        let err = session.related(a, "books").unwrap_err();
        assert_eq!(err.relation_kind(), Some(RelationErrorKind::NotLoaded));

        unwrap_outcome(session.load(&cx, &[a], "books").await);
        assert!(session.related(a, "books").unwrap().is_empty());
    });
}

#[test]
fn config_document_builds_a_pooled_database() {
    let config = DatabaseConfig::from_json(
        r#"{"dialect": "sqlite", "pool": {"max_connections": 4, "test_on_checkout": false}}"#,
    )
    .unwrap();
    assert_eq!(config.dialect, DialectKind::Sqlite);
    assert_eq!(config.pool.max_connections, 4);

    let (db, _session) = sqlrel::open(ScriptedConnector::new(), library(), &config).unwrap();
    assert_eq!(db.phrasing().name(), "sqlite");
    assert_eq!(db.source().config().max_connections, 4);
}
