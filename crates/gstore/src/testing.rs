//! Scripted relational engine for unit tests.
//!
//! Statements are answered by the most recently added rule whose pattern
//! occurs in the SQL text. Unmatched statements return no rows and affect
//! nothing. Every statement is logged with its parameters.

use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{Connection, Connector, Error, Param, Record, Result};

#[derive(Clone, Debug)]
pub(crate) enum Reply {
    Rows(Vec<Record>),
    Count(u64),
    Fail(&'static str),
}

#[derive(Default)]
struct ScriptState {
    rules: Vec<(String, Reply)>,
    log: Vec<(String, Vec<Param>)>,
}

#[derive(Clone, Default)]
pub(crate) struct Script {
    state: Arc<Mutex<ScriptState>>,
}

impl Script {
    pub(crate) fn on(&self, pattern: &str, reply: Reply) -> &Self {
        self.state.lock().rules.push((pattern.to_owned(), reply));
        self
    }

    pub(crate) fn rows(&self, pattern: &str, rows: serde_json::Value) -> &Self {
        let rows = serde_json::from_value(rows).unwrap_or_default();
        self.on(pattern, Reply::Rows(rows))
    }

    /// Every statement sent so far.
    pub(crate) fn statements(&self) -> Vec<String> {
        self.state.lock().log.iter().map(|(sql, _)| sql.clone()).collect()
    }

    /// Parameters of the first logged statement containing `pattern`.
    pub(crate) fn params_of(&self, pattern: &str) -> Option<Vec<Param>> {
        self.state
            .lock()
            .log
            .iter()
            .find(|(sql, _)| sql.contains(pattern))
            .map(|(_, params)| params.clone())
    }

    fn answer(&self, sql: &str, params: &[Param]) -> Option<Reply> {
        let mut state = self.state.lock();
        state.log.push((sql.to_owned(), params.to_vec()));
        state
            .rules
            .iter()
            .rev()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone())
    }
}

pub(crate) struct ScriptedConnection {
    script: Script,
}

impl ScriptedConnection {
    pub(crate) fn new(script: &Script) -> Self {
        Self {
            script: script.clone(),
        }
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn query(&mut self, sql: &str, params: &[Param]) -> Result<Vec<Record>> {
        match self.script.answer(sql, params) {
            Some(Reply::Rows(rows)) => Ok(rows),
            Some(Reply::Fail(msg)) => Err(Error::backend(msg)),
            Some(Reply::Count(_)) | None => Ok(Vec::new()),
        }
    }

    async fn execute(&mut self, sql: &str, params: &[Param]) -> Result<u64> {
        match self.script.answer(sql, params) {
            Some(Reply::Count(n)) => Ok(n),
            Some(Reply::Rows(rows)) => Ok(rows.len() as u64),
            Some(Reply::Fail(msg)) => Err(Error::backend(msg)),
            None => Ok(0),
        }
    }

    async fn batch(&mut self, sql: &str) -> Result<()> {
        match self.script.answer(sql, &[]) {
            Some(Reply::Fail(msg)) => Err(Error::backend(msg)),
            _ => Ok(()),
        }
    }

    fn is_closed(&self) -> bool {
        false
    }
}

#[derive(Clone, Default)]
pub(crate) struct ScriptedConnector {
    pub(crate) script: Script,
    opened: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub(crate) fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Conn = ScriptedConnection;

    async fn connect(&self) -> Result<ScriptedConnection> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedConnection::new(&self.script))
    }
}
