//! Shared fixtures: a library schema and a connector that records every
//! statement and replies from a script.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use sqlrel::prelude::*;
use sqlrel::{QueryErrorKind, QueryResult};

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

pub fn library() -> Arc<Schema> {
    Schema::builder()
        .entity(
            EntityDef::new("author", "authors")
                .field(FieldDef::id("id"))
                .field(FieldDef::new("name", SqlType::Text))
                .relation(RelationDescriptor::to_many("books", "book")),
        )
        .entity(
            EntityDef::new("book", "books")
                .field(FieldDef::id("id"))
                .field(FieldDef::new("title", SqlType::Text))
                .field(FieldDef::new("author_id", SqlType::BigInt).nullable(true))
                .field(FieldDef::new("editor_id", SqlType::BigInt).nullable(true))
                .relation(RelationDescriptor::to_one("author", "author"))
                .relation(RelationDescriptor::to_one("editor", "author"))
                .relation(RelationDescriptor::to_many("taggings", "tagging"))
                .relation(RelationDescriptor::through("tags", "tag", "taggings", "tag")),
        )
        .entity(
            EntityDef::new("tag", "tags")
                .field(FieldDef::id("id"))
                .field(FieldDef::new("name", SqlType::Text)),
        )
        .entity(
            EntityDef::new("tagging", "taggings")
                .field(FieldDef::id("id"))
                .field(FieldDef::new("book_id", SqlType::BigInt))
                .field(FieldDef::new("tag_id", SqlType::BigInt))
                .relation(RelationDescriptor::to_one("book", "book"))
                .relation(RelationDescriptor::to_one("tag", "tag")),
        )
        .entity(
            EntityDef::new("person", "people")
                .field(FieldDef::id("id"))
                .field(FieldDef::new("name", SqlType::Text))
                .field(FieldDef::new("age", SqlType::Integer)),
        )
        .build()
        .expect("library schema")
}

pub fn rows(columns: &[&str], data: Vec<Vec<Value>>) -> QueryResult {
    let columns: Vec<String> = columns.iter().map(|c| (*c).to_string()).collect();
    QueryResult::from_rows(
        data.into_iter()
            .map(|values| Row::new(columns.clone(), values))
            .collect(),
    )
}

type Reply = std::result::Result<QueryResult, String>;

#[derive(Default)]
struct Script {
    replies: Mutex<Vec<(String, VecDeque<Reply>)>>,
    log: Mutex<Vec<(String, Vec<Value>)>>,
}

/// Connector whose connections share one script and one statement log.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    script: Arc<Script>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, pattern: &str, reply: Reply) {
        let mut replies = self.script.replies.lock().unwrap();
        match replies.iter_mut().find(|(p, _)| p == pattern) {
            Some((_, queue)) => queue.push_back(reply),
            None => replies.push((pattern.to_string(), VecDeque::from([reply]))),
        }
    }

    /// Queue `result` for the next statement containing `pattern`.
    pub fn respond(&self, pattern: &str, result: QueryResult) {
        self.push(pattern, Ok(result));
    }

    /// Fail the next statement containing `pattern`.
    pub fn fail_on(&self, pattern: &str, message: &str) {
        self.push(pattern, Err(message.to_string()));
    }

    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.script.log.lock().unwrap().clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.calls().into_iter().map(|(sql, _)| sql).collect()
    }
}

pub struct ScriptedConn {
    script: Arc<Script>,
}

impl Connection for ScriptedConn {
    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<QueryResult, Error>> + Send {
        self.script
            .log
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        let reply = {
            let mut replies = self.script.replies.lock().unwrap();
            replies
                .iter_mut()
                .find(|(pattern, queue)| sql.contains(pattern.as_str()) && !queue.is_empty())
                .and_then(|(_, queue)| queue.pop_front())
        };
        let outcome = match reply {
            Some(Ok(result)) => Outcome::Ok(result),
            Some(Err(message)) => {
                Outcome::Err(Error::query(QueryErrorKind::Database, None, message))
            }
            None => Outcome::Ok(QueryResult::default()),
        };
        async move { outcome }
    }

    fn ping(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        async { Outcome::Ok(()) }
    }
}

impl Connector for ScriptedConnector {
    type Conn = ScriptedConn;

    fn connect(&self, _cx: &Cx) -> impl Future<Output = Outcome<ScriptedConn, Error>> + Send {
        let conn = ScriptedConn {
            script: Arc::clone(&self.script),
        };
        async move { Outcome::Ok(conn) }
    }

    fn disconnect(
        &self,
        _cx: &Cx,
        _conn: ScriptedConn,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        async { Outcome::Ok(()) }
    }
}
