//! CLI command bodies.
//!
//! # Data Flow
//! ```text
//! strata routes → Settings.routes → Routes → routes::render → stdout
//! strata shell  → Settings → shell::run
//!     → server with CONNECT / bound to the console
//!     → one synthetic request holds the console open until `exit`
//! ```

pub mod routes;
pub mod shell;
