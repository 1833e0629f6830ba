//! Method dispatch for remote peers.
//!
//! A call arrives as a method name and a list of JSON arguments. Argument
//! shapes are checked before anything else runs, and a mismatch is answered
//! with [`ErrorCode::InvalidSignature`]. Identifiers travel as decimal
//! strings. Failures are reported only by their [`ErrorCode`].

use std::sync::Arc;

use serde_json::Value;

use crate::{
    Connector, ErrorCode, IdList, JsqlOp, Operation, Query, Record, RelationalProvider, Result,
};

type CallResult = core::result::Result<Value, ErrorCode>;

/// Exposes a [`RelationalProvider`] to remote callers.
pub struct RemoteApi<C: Connector> {
    provider: Arc<RelationalProvider<C>>,
}

impl<C: Connector> Clone for RemoteApi<C> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
        }
    }
}

fn string(value: &Value) -> core::result::Result<&str, ErrorCode> {
    value.as_str().ok_or(ErrorCode::InvalidSignature)
}

fn object(value: &Value) -> core::result::Result<Record, ErrorCode> {
    value.as_object().cloned().ok_or(ErrorCode::InvalidSignature)
}

fn id(value: &Value) -> core::result::Result<u64, ErrorCode> {
    string(value)?.parse().map_err(|_| ErrorCode::InvalidSignature)
}

/// One id string or an array of them.
fn ids(value: &Value) -> core::result::Result<IdList, ErrorCode> {
    match value {
        Value::Array(items) => items.iter().map(id).collect::<core::result::Result<Vec<_>, _>>().map(IdList),
        single => id(single).map(IdList::from),
    }
}

fn jsql(value: &Value) -> core::result::Result<Vec<Operation>, ErrorCode> {
    let items = value.as_array().ok_or(ErrorCode::InvalidSignature)?;
    if !items.iter().all(Value::is_object) {
        return Err(ErrorCode::InvalidSignature);
    }
    items
        .iter()
        .map(|item| {
            serde_json::from_value::<JsqlOp>(item.clone())
                .map(Operation::from)
                .map_err(|_| ErrorCode::InvalidArgument)
        })
        .collect()
}

fn respond<T: Into<Value>>(outcome: Result<T>) -> CallResult {
    outcome.map(Into::into).map_err(|err| err.code())
}

fn records(rows: Vec<Record>) -> Value {
    Value::Array(rows.into_iter().map(Value::Object).collect())
}

impl<C: Connector> RemoteApi<C> {
    pub const fn new(provider: Arc<RelationalProvider<C>>) -> Self {
        Self { provider }
    }

    pub const fn provider(&self) -> &Arc<RelationalProvider<C>> {
        &self.provider
    }

    /// Runs `method` with `args` and returns its JSON result.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self, args)))]
    pub async fn call(&self, method: &str, args: &[Value]) -> CallResult {
        let outcome = self.dispatch(method, args).await;
        #[cfg(feature = "tracing")]
        if let Err(code) = &outcome {
            tracing::debug!(%code, "remote call failed");
        }
        outcome
    }

    async fn dispatch(&self, method: &str, args: &[Value]) -> CallResult {
        let provider = &self.provider;
        match (method, args) {
            ("get", [target]) => respond(provider.get(id(target)?).await.map(Value::Object)),
            ("getDetails", [target, field]) => {
                let (target, field) = (id(target)?, string(field)?);
                respond(provider.get_details(target, field).await.map(records))
            }
            ("set", [record]) => respond(provider.set(object(record)?).await.map(|()| Value::Null)),
            ("create", [category, record]) => {
                let (category, record) = (string(category)?, object(record)?);
                respond(provider.create(category, record).await.map(|id| id.to_string()))
            }
            ("update", [category, query, patch]) => {
                let (category, query, patch) = (string(category)?, object(query)?, object(patch)?);
                respond(provider.update(category, Query::from(query), patch).await)
            }
            ("delete", [category, query]) => {
                let (category, query) = (string(category)?, object(query)?);
                respond(provider.delete(category, Query::from(query)).await)
            }
            ("linkDetails", [category, field, from, to]) => {
                let (category, field, from, to) = (string(category)?, string(field)?, id(from)?, ids(to)?);
                respond(provider.link_details(category, field, from, to).await.map(|()| Value::Null))
            }
            ("unlinkDetails", [category, field, from, to]) => {
                let (category, field, from, to) = (string(category)?, string(field)?, id(from)?, ids(to)?);
                respond(provider.unlink_details(category, field, from, to).await.map(|()| Value::Null))
            }
            ("select", [category, program]) => {
                let (category, program) = (string(category)?, jsql(program)?);
                let mut cursor = provider.cursor(category).enroll(program);
                respond(cursor.fetch().await.map(records))
            }
            ("getSchemaSources", []) => respond(provider.schema_sources()),
            (
                "get" | "getDetails" | "set" | "create" | "update" | "delete" | "linkDetails"
                | "unlinkDetails" | "select" | "getSchemaSources",
                _,
            ) => Err(ErrorCode::InvalidSignature),
            _ => Err(ErrorCode::NotImplemented),
        }
    }
}
