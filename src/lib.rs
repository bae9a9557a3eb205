//! # repodoc
//!
//! A repository documentation service. Clients submit a git URL or a zip
//! archive; repodoc materializes the source, runs an external
//! documentation tool over it in two phases (analyze, then generate a
//! README), persists the produced artifacts, and reports progress through a
//! project status that only ever moves forward.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌─────────────┐   ┌──────────┐
//! │ Acquire  │──▶│ Analyze  │──▶│  Generate   │──▶│ Collect  │
//! │ git/zip  │   │  (tool)  │   │ README(tool)│   │ artifacts│
//! └──────────┘   └──────────┘   └─────────────┘   └────┬─────┘
//!                                                      ▼
//!                 ┌──────────┐       ┌──────────┐   ┌──────────┐
//!                 │   CLI    │       │   HTTP   │──▶│  SQLite  │
//!                 │(repodoc) │       │  (axum)  │   │  Store   │
//!                 └──────────┘       └──────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! repodoc init                                       # create database
//! repodoc submit https://github.com/acme/widget.git  # run one pipeline
//! repodoc list                                       # projects + status
//! repodoc serve                                      # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Projects, sources, artifacts, status machine |
//! | [`error`] | Pipeline error taxonomy |
//! | [`acquire`] | Git clone / zip extraction into run directories |
//! | [`tool`] | External documentation tool invocation |
//! | [`collect`] | Artifact discovery in tool output |
//! | [`store`] | Persistence trait with SQLite and in-memory backends |
//! | [`pipeline`] | Orchestration of one run per project |
//! | [`runs`] | Active-run registry and cancellation |
//! | [`progress`] | Pipeline event reporting |
//! | [`sweep`] | Retention sweep of orphaned run directories |
//! | [`get`] | Project retrieval for CLI and HTTP |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod acquire;
pub mod collect;
pub mod config;
pub mod db;
pub mod error;
pub mod get;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod runs;
pub mod server;
pub mod store;
pub mod sweep;
pub mod tool;
