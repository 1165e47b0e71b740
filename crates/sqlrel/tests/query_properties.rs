mod common;

use serde_json::json;
use sqlrel::prelude::*;
use sqlrel::{Compiler, MySql, Postgres, ResolutionErrorKind, Sqlite, Standard};

use common::library;

fn compile(query: &Query) -> (String, Vec<Value>) {
    let schema = library();
    let compiled = Compiler::new(&Standard, &schema)
        .compile(query)
        .expect("query compiles");
    (compiled.sql, compiled.params)
}

#[test]
fn mutators_never_touch_the_original() {
    let base = Query::select("books").filter(Condition::eq("title", "Dune"));
    let before = compile(&base);

    let mutators: Vec<Box<dyn Fn(&Query) -> Query>> = vec![
        Box::new(|q| q.filter(Condition::gt("id", 3))),
        Box::new(|q| q.order_by("-title")),
        Box::new(|q| q.limit(5)),
        Box::new(|q| q.offset(10)),
        Box::new(|q| q.join("author")),
        Box::new(|q| q.columns(&["id", "title"])),
        Box::new(|q| q.group_by(&["author_id"])),
        Box::new(|q| q.with("author")),
        Box::new(|q| q.where_map(&json!({"author.name": "Herbert"})).unwrap()),
        Box::new(|q| q.begin()),
    ];
    for mutate in &mutators {
        let _derived = mutate(&base);
        assert_eq!(compile(&base), before);
    }
    assert_ne!(compile(&mutators[0](&base)), before);
    assert!(base.eager_paths().is_empty());
    assert!(base.transaction().is_none());
}

#[test]
fn aliases_are_deterministic_and_ordered_by_encounter() {
    let q = Query::select("books").join("author").join("editor");
    let (sql, _) = compile(&q);
    assert!(sql.contains("INNER JOIN \"authors\" AS \"author\" ON \"author\".\"id\" = \"books\".\"author_id\""));
    assert!(sql.contains("INNER JOIN \"authors\" AS \"editor_j1\" ON \"editor_j1\".\"id\" = \"books\".\"editor_id\""));
    assert_eq!(compile(&q), compile(&Query::select("books").join("author").join("editor")));

    let (reversed, _) = compile(&Query::select("books").join("editor").join("author"));
    assert!(reversed.contains("AS \"editor\""));
    assert!(reversed.contains("AS \"author_j1\""));
}

#[test]
fn repeated_paths_join_once() {
    let q = Query::select("books")
        .filter(Condition::eq("author.name", "Le Guin"))
        .order_by("author.name");
    let (sql, params) = compile(&q);
    assert_eq!(sql.matches("INNER JOIN").count(), 1);
    assert!(sql.ends_with("ORDER BY \"author\".\"name\" ASC"));
    assert_eq!(params, vec![Value::from("Le Guin")]);
}

#[test]
fn unknown_relation_segment_is_reported_with_known_relations() {
    let schema = library();
    let err = Compiler::new(&Standard, &schema)
        .compile(&Query::select("books").join("author.boks"))
        .unwrap_err();
    assert_eq!(
        err.resolution_kind(),
        Some(ResolutionErrorKind::NoSuchRelation)
    );
    let msg = err.to_string();
    assert!(msg.contains("'boks'"));
    assert!(msg.contains("'author'"));
    assert!(msg.contains("books"));
}

#[test]
fn ambiguous_bare_field_names_both_tables() {
    let schema = library();
    let joined = Query::select("books").join("author").join("editor");
    let err = Compiler::new(&Standard, &schema)
        .compile(&joined.filter(Condition::eq("name", "x")))
        .unwrap_err();
    assert_eq!(
        err.resolution_kind(),
        Some(ResolutionErrorKind::AmbiguousField)
    );
    let msg = err.to_string();
    assert!(msg.contains("'author' (table 'authors')"));
    assert!(msg.contains("'editor_j1' (table 'authors')"));

    let (sql, _) = compile(&joined.filter(Condition::eq("editor.name", "x")));
    assert!(sql.ends_with("WHERE \"editor_j1\".\"name\" = $1"));
}

#[test]
fn field_on_primary_and_joined_table_needs_qualification() {
    let schema = library();
    let joined = Query::select("books").join("author");
    let err = Compiler::new(&Standard, &schema)
        .compile(&joined.filter(Condition::eq("id", 3)))
        .unwrap_err();
    assert_eq!(
        err.resolution_kind(),
        Some(ResolutionErrorKind::AmbiguousField)
    );
    assert!(err.to_string().contains("'books' (table 'books')"));
    assert!(err.to_string().contains("'author' (table 'authors')"));

    let (sql, params) = compile(&joined.filter(Condition::eq("books.id", 3)));
    assert!(sql.ends_with("WHERE \"books\".\"id\" = $1"));
    assert_eq!(params, vec![Value::Int(3)]);
}

#[test]
fn explicit_table_round_trip_across_dialects() {
    let schema = library();
    let q = Query::select("t")
        .columns(&["a", "b"])
        .filter(Condition::eq("id", 5));

    let standard = Compiler::new(&Standard, &schema).compile(&q).unwrap();
    assert_eq!(standard.sql, "SELECT \"a\", \"b\" FROM \"t\" WHERE \"id\" = $1");
    assert_eq!(standard.params, vec![Value::Int(5)]);

    let postgres = Compiler::new(&Postgres::default(), &schema).compile(&q).unwrap();
    let mysql = Compiler::new(&MySql::default(), &schema).compile(&q).unwrap();
    let sqlite = Compiler::new(&Sqlite::default(), &schema).compile(&q).unwrap();
    assert_eq!(postgres.sql, standard.sql);
    assert_eq!(mysql.sql, "SELECT `a`, `b` FROM `t` WHERE `id` = ?");
    assert_eq!(sqlite.sql, "SELECT \"a\", \"b\" FROM \"t\" WHERE \"id\" = ?1");
    for compiled in [&postgres, &mysql, &sqlite] {
        assert_eq!(compiled.params, standard.params);
    }
}

#[test]
fn people_scenario_compiles_filter_order_and_limit() {
    let q = Query::select("people")
        .where_map(&json!({"age": {"gte": 21}}))
        .unwrap()
        .order_by("-name")
        .limit(10);
    let (sql, params) = compile(&q);
    assert_eq!(
        sql,
        "SELECT * FROM \"people\" WHERE \"age\" >= $1 ORDER BY \"name\" DESC LIMIT 10"
    );
    assert_eq!(params, vec![Value::Int(21)]);
}

#[test]
fn unknown_operator_fails_when_building() {
    let err = Query::select("people")
        .where_map(&json!({"age[around]": 30}))
        .unwrap_err();
    assert!(err.to_string().contains("around"));
}

#[test]
fn through_condition_walks_both_hops() {
    let (sql, params) = compile(&Query::select("books").filter(Condition::eq("tags.name", "sf")));
    assert!(sql.contains("INNER JOIN \"taggings\""));
    assert!(sql.contains("INNER JOIN \"tags\" AS \"tags\""));
    assert!(sql.ends_with("GROUP BY \"books\".\"id\""));
    assert_eq!(params, vec![Value::from("sf")]);
}
