//! PostgreSQL tests. They need Docker and are ignored by default:
//! `cargo test -p bidwatch-db -- --ignored`.

mod common;
mod snapshot_tests;
