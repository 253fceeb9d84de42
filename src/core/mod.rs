/*!
 * Core Module
 * Shared error taxonomy and identity types
 */

pub mod errors;
pub mod id;

// Re-export for convenience
pub use errors::*;
pub use id::ObjectId;
