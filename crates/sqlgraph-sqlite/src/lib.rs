//! SQLite connection for sqlgraph.
//!
// FFI requires unsafe code
#![allow(unsafe_code)]
//!
//! Implements the `Connection` trait from sqlgraph-core on top of
//! `libsqlite3-sys` (bundled), which gives the engines everything they need:
//! parameterized statements, `PRAGMA table_info` introspection, foreign-key
//! toggling and savepoints.
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlgraph_sqlite::SqliteConnection;
//! use sqlgraph_core::{Connection, Cx, Value};
//!
//! let conn = SqliteConnection::open_memory()?;
//! conn.execute_raw("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
//! let cx = Cx::for_testing();
//! conn.execute(&cx, "INSERT INTO users (name) VALUES (?)", &[Value::Text("Ann".into())]).await;
//! ```
//!
//! # Type Mapping
//!
//! | Value | SQLite storage |
//! |-----------|-------------|
//! | `Bool` | INTEGER (0/1) |
//! | `TinyInt`..`BigInt` | INTEGER |
//! | `Float`, `Double` | REAL |
//! | `Text` | TEXT |
//! | `Bytes` | BLOB |
//! | `Timestamp` | TEXT (`YYYY-MM-DD HH:MM:SS.ffffff`) |

pub mod connection;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection};

/// The linked SQLite library version.
pub fn sqlite_version() -> String {
    // SAFETY: sqlite3_libversion returns a static NUL-terminated string
    unsafe { std::ffi::CStr::from_ptr(libsqlite3_sys::sqlite3_libversion()) }
        .to_string_lossy()
        .into_owned()
}
