//! # CLI Module
//!
//! Command-line interface of the `mayrpc-server` binary.
//!
//! ## Commands
//!
//! ### `serve`
//!
//! Serve the built-in demo handlers (`ping`, `echo`, `echo_delayed`):
//!
//! ```bash
//! mayrpc-server serve --port 9000 --timeout-ms 30000
//! ```
//!
//! Options:
//! - `--config <FILE>` - YAML configuration; replaces the `MAYRPC_*` environment
//! - `--host <HOST>`, `--port <PORT>` - bind address
//! - `--workers <N>` - scheduler worker threads
//! - `--timeout-ms <MS>` - heartbeat timeout, `0` disables it
//!
//! SIGINT and SIGTERM stop the server gracefully.
//!
//! ### `ids`
//!
//! Print the function id derived from each handler name:
//!
//! ```bash
//! mayrpc-server ids echo ping
//! ```

mod commands;

pub use commands::{run_cli, Cli, Commands};
