//! The relational engine seam.
//!
//! The provider never talks to a database driver directly. It issues SQL text
//! and positional [`Param`]s through a [`Connection`], which a [`Connector`]
//! creates on demand for the [`ConnectionPool`]. The Postgres backend lives in
//! [`postgres`]; tests drive the provider through a scripted connector.

pub mod pool;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod transaction;

pub use pool::*;
#[cfg(feature = "postgres")]
pub use postgres::*;
pub use transaction::*;

use async_trait::async_trait;
use serde_json::Value;

use crate::{Record, Result};

/// A positional query parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum Param {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Text, also used for values the server coerces to its declared column
    /// type (numerics above `i64::MAX`, timestamps, enums).
    Text(String),
    Bytes(Vec<u8>),
    Json(Value),
}

impl Param {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_u64().map(|u| Self::Text(u.to_string())))
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            Value::String(s) => Self::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => Self::Json(value.clone()),
        }
    }

    /// Identifiers travel as text so the full `u64` range survives.
    pub fn id(id: u64) -> Self {
        Self::Text(id.to_string())
    }
}

impl From<&Value> for Param {
    fn from(value: &Value) -> Self {
        Self::from_value(value)
    }
}

impl From<&str> for Param {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Param {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Param {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

/// SQL text with its positional parameters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Param>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// A single live session with the relational engine.
#[async_trait]
pub trait Connection: Send {
    /// Runs a statement and decodes every returned row.
    async fn query(&mut self, sql: &str, params: &[Param]) -> Result<Vec<Record>>;

    /// Runs a statement and returns the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[Param]) -> Result<u64>;

    /// Runs parameterless statements such as `BEGIN` or `COMMIT`.
    async fn batch(&mut self, sql: &str) -> Result<()>;

    /// Whether the session is unusable and must not return to the pool.
    fn is_closed(&self) -> bool;
}

/// Opens new [`Connection`]s.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection + 'static;

    async fn connect(&self) -> Result<Self::Conn>;
}
