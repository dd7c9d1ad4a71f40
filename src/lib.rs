//! # ocaz
//!
//! A content-addressable catalog of media reachable over HTTP.
//!
//! Submitted URLs are fetched and identified by the SHA-1 of their first
//! ten megabytes (the *prefix hash*). Every distinct identity becomes an
//! object that later stages enrich with a full-content hash, media
//! metadata, a perceptual hash and classifier predictions. A forwarder
//! turns any known hash back into a live URL.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────────┐   ┌──────────┐
//! │ add-url  │──▶│  Stages (batch runner)   │──▶│  SQLite  │
//! │  (CLI)   │   │ prefix/sha1/media/phash/ │   │ urls     │
//! └──────────┘   │ classify                 │   │ objects  │
//!                └──────────────────────────┘   └────┬─────┘
//!                                                    │
//!                                              ┌─────▼─────┐
//!                                              │ Forwarder │
//!                                              │  (HTTP)   │
//!                                              └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ocaz init
//! ocaz add-url https://example.com/cat.jpg
//! ocaz resolve prefix
//! ocaz resolve sha1 --max-workers 8
//! ocaz classify nsfw-opennsfw2
//! ocaz serve forwarder
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Records and mutations |
//! | [`store`] | Identity store trait and backends |
//! | [`batch`] | Bounded-concurrency stage runner |
//! | [`resolve`] | The enrichment stages |
//! | [`fetch`] | HTTP fetching of prefixes and full content |
//! | [`forward`] | Hash to live URL lookup |
//! | [`server`] | Forwarder HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod batch;
pub mod classifier;
pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod forward;
pub mod hash;
pub mod ingest;
pub mod migrate;
pub mod mime;
pub mod models;
pub mod phash;
pub mod probe;
pub mod resolve;
pub mod server;
pub mod show;
pub mod stats;
pub mod store;
