//! OpenPan Core - Domain logic and port definitions
//!
//! This crate contains the provider-agnostic core of the OpenPan storage
//! client:
//! - **Domain types** - `RemotePath`, `FileId`, `Md5Hash`, `ObjectInfo`,
//!   `Quota`, `AccountTier`, the directory cache
//! - **Port definitions** - Traits for adapters: `IRemoteStore`, `IConfigStore`
//! - **Name encoding** - Mapping between standard path names and the
//!   provider's restricted character set
//! - **Configuration** - Typed remote configuration with YAML persistence
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure business logic with no HTTP dependencies.
//! Ports define trait interfaces that adapter crates implement; the concrete
//! 123Pan open-platform adapter lives in `openpan-client`.

pub mod config;
pub mod domain;
pub mod encoding;
pub mod ports;
