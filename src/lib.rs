//! bookland-rs: a personal e-book library manager.
//!
//! Scans directories for EPUB, PDF, MOBI, AZW3, FB2 and CBZ files,
//! extracts title, author and a cover image from each, and registers
//! them in a SQLite catalog.
//!
//! # Features
//!
//! - EPUB metadata from the OPF package, with three cover strategies
//! - Heuristic PDF metadata and first-page covers via `pdftoppm`
//! - CBZ covers from the first page image
//! - Idempotent scans keyed by file path
//! - Managed per-book storage for imported files and covers

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// Book format handlers.
pub mod formats;
/// Library service, book model and scanner.
pub mod library;
/// External process execution.
pub mod process;


pub use config::{BookFormat, Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use library::{Book, Library};
