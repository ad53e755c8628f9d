//! Database layer for the local retry queue

mod connection;
mod migrations;

pub use connection::Database;
