//! Anonymization of diagnostic archives.
//!
//! Sensitive tokens (hostnames, IPv4 and MAC addresses, usernames, user
//! keywords) are replaced with consistent synthetic values across every file
//! of every archive in a run. The mappings can be persisted and reused so
//! later runs obfuscate the same environment the same way.
//!
//! ```no_run
//! use diagscrub::{Cleaner, CleanerConfig};
//!
//! let mut config = CleanerConfig::default();
//! config.parsers.domains.push("example.com".to_string());
//! let cleaner = Cleaner::new(config)?;
//! let run = cleaner.execute(&["/var/tmp/sosreport-host1.tar.xz"]);
//! for report in &run.completed {
//!     println!("{} -> {}", report.source.display(), report.final_path.display());
//! }
//! # Ok::<(), diagscrub::CleanerError>(())
//! ```

/// Error types
pub mod error;

/// Logging and tracing setup
pub mod logging;

/// Timeouts and the isolated extraction worker
pub mod timeout;

/// Run configuration
pub mod config;

/// Per-category mapping stores
pub mod mappings;

/// Line parsers
pub mod parsers;

/// Archive lifecycle
pub mod archive;

/// Run orchestration
pub mod cleaner;

pub use archive::{ArchiveState, CompressionMethod, ObfuscationArchive};
pub use cleaner::{ArchiveFailure, ArchiveReport, Cleaner, CleanerRun};
pub use config::CleanerConfig;
pub use error::{CleanerError, Result};
pub use mappings::{Category, MappingSet, MappingStore};
pub use parsers::{Parser, ParserKind};
