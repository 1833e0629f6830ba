#![doc = include_str!("../README.md")]

mod cursor;
mod engine;
mod error;
mod ident;
mod provider;
mod query;
mod record;
mod remote;
mod routing;
mod schema;
pub mod sql;

#[cfg(test)]
mod testing;

pub use crate::cursor::*;
pub use crate::engine::*;
pub use crate::error::*;
pub use crate::ident::*;
pub use crate::provider::*;
pub use crate::query::*;
pub use crate::record::*;
pub use crate::remote::*;
pub use crate::routing::*;
pub use crate::schema::*;
