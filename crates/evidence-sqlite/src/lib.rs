//! SQLite-backed evidence store: the append-only run log, the stateful issue
//! queue, and the asset inventory. All persistence for the engine lives here;
//! everything downstream of this crate is a pure computation.

mod assets;
mod issues;
mod models;
mod open;
mod runs;
mod schema;

pub use models::*;
pub use open::Db;
