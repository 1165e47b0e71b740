//! Scripted connection source for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sqlrel_core::{
    Connection, ConnectionSource, Cx, Error, Outcome, QueryErrorKind, QueryResult, Value,
};

type Reply = std::result::Result<QueryResult, String>;

#[derive(Default)]
struct Shared {
    rules: Mutex<Vec<(String, VecDeque<Reply>)>>,
    log: Mutex<Vec<(String, Vec<Value>)>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

/// Records every statement; replies with the first queued response whose
/// pattern occurs in the SQL, otherwise an empty result.
#[derive(Clone, Default)]
pub(crate) struct MockSource {
    shared: Arc<Shared>,
}

impl MockSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn push(&self, pattern: &str, reply: Reply) {
        let mut rules = self.shared.rules.lock().unwrap();
        match rules.iter_mut().find(|(p, _)| p == pattern) {
            Some((_, queue)) => queue.push_back(reply),
            None => rules.push((pattern.to_string(), VecDeque::from([reply]))),
        }
    }

    pub(crate) fn respond(&self, pattern: &str, result: QueryResult) {
        self.push(pattern, Ok(result));
    }

    pub(crate) fn fail_on(&self, pattern: &str, message: &str) {
        self.push(pattern, Err(message.to_string()));
    }

    pub(crate) fn acquired(&self) -> usize {
        self.shared.acquired.load(Ordering::SeqCst)
    }

    pub(crate) fn released(&self) -> usize {
        self.shared.released.load(Ordering::SeqCst)
    }

    pub(crate) fn statements(&self) -> Vec<String> {
        self.calls().into_iter().map(|(sql, _)| sql).collect()
    }

    pub(crate) fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.shared.log.lock().unwrap().clone()
    }

    pub(crate) fn clear_log(&self) {
        self.shared.log.lock().unwrap().clear();
    }
}

pub(crate) struct MockConn {
    shared: Arc<Shared>,
}

impl Connection for MockConn {
    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<QueryResult, Error>> + Send {
        self.shared
            .log
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        let reply = {
            let mut rules = self.shared.rules.lock().unwrap();
            rules
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

impl ConnectionSource for MockSource {
    type Conn = MockConn;

    fn acquire(&self, _cx: &Cx) -> impl Future<Output = Outcome<MockConn, Error>> + Send {
        self.shared.acquired.fetch_add(1, Ordering::SeqCst);
        let conn = MockConn {
            shared: Arc::clone(&self.shared),
        };
        async move { Outcome::Ok(conn) }
    }

    fn release(&self, _conn: MockConn) {
        self.shared.released.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}
