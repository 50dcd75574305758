//! Utility modules for error handling, configuration and file placement

pub mod config;
pub mod error;
pub mod organizer;
pub mod tagging;

// Re-export for convenience
pub use config::Settings;
pub use error::{ArchiveError, ArchiveResult};
pub use organizer::{OrganizationSettings, OutputOrganizer};
