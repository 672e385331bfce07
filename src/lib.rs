//! Certforge - Hierarchical Certificate Authority Orchestrator
//!
//! Provisions and maintains a tree of certificate authorities and leaf
//! certificates on disk, driving the external `openssl` command-line
//! toolkit for every cryptographic step and keeping an OCSP responder
//! synchronized with the tree.
//!
//! # Overview
//!
//! ```text
//! rootca (self-signed, trust bundle)
//!   └── intermediate CA (signed by rootca)
//!       └── leaf certificate (keystore bundle, revocable)
//! ```
//!
//! The core is the recursive, idempotent build walk: each step reports
//! whether it freshly produced its output, and a fresh upstream artifact
//! forces every derived artifact to regenerate even when reruns would
//! otherwise skip existing files. That makes partial re-runs (crash and
//! restart, configuration edits, forced rebuilds) converge without a
//! transactional execution engine.
//!
//! # Quick Start
//!
//! ```no_run
//! use certforge::configs::AppConfig;
//! use certforge::engine::Engine;
//! use certforge::store::Certificate;
//! use anyhow::Result;
//!
//! fn main() -> Result<()> {
//!     let config = AppConfig::load()?;
//!     let engine = Engine::bootstrap(config)?;
//!
//!     engine.insert_certificate(
//!         "rootca",
//!         Certificate {
//!             name: "server".to_string(),
//!             key_size: 2048,
//!             subject: "/CN=server.example.com".to_string(),
//!             password: None,
//!             revoked: false,
//!             relative_path: None,
//!             signing_ca_name: None,
//!         },
//!     )?;
//!     engine.revoke_certificate("rootca", "server")?;
//!     assert!(engine.is_certificate_revoked("rootca", "server")?);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`store`]: in-memory forest of authorities and certificates, the
//!   single source of truth for identity and relationships
//! - [`executor`]: runs the external toolkit and gates on expected output
//!   artifacts
//! - [`toolkit`]: the individual build steps (keys, CSRs, signing, CRLs,
//!   chains, bundles) and the revocation workflow
//! - [`builder`]: the recursive orchestrator with its force-recreate
//!   cascade
//! - [`ocsp`]: supervisor of the background OCSP responder process
//! - [`engine`]: serialized tree mutations, persistence, responder
//!   lifecycle
//! - [`configs`]: TOML process configuration
//! - [`templates`]: `ca.conf` rendering
//!
//! # Error Handling
//!
//! Library APIs return [`errors::Result`]. Precondition violations
//! (unknown authority, missing password, populated child lists) are
//! recoverable `Validation` errors; toolkit failures carry the captured
//! stderr; an artifact missing after a successful invocation is reported
//! as an output-contract violation. Nothing is retried automatically and
//! nothing is rolled back: artifacts written before a failure stay on
//! disk, and idempotency on the next run is the recovery mechanism.

pub mod builder;
pub mod configs;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod ocsp;
pub mod store;
pub mod templates;
pub mod toolkit;

pub use engine::Engine;
pub use errors::{Error, Result};
