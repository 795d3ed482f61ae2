//! macOS keychain plumbing for identity export
//!
//! # Module Organization
//!
//! - `runner` - Invocation of the `security` utility
//! - `validation` - Path expansion and preflight checks
//! - `prompts` - Colored output macros
//! - `keychain` - Scratch keychains, search list, export and verification
//!
//! # Error Handling Strategy
//!
//! **CRITICAL I/O** - Errors propagated with `?` operator:
//!   • File operations on the bundle and its base64 rendering
//!   • Starting the `security` process
//!   • Keychain steps whose failure makes the export meaningless
//!
//! **DECORATIVE I/O** - Errors ignored with `let _ =`:
//!   • Terminal coloring and status lines
//!
//! **BEST-EFFORT CLEANUP** - Reported as warnings, never returned:
//!   • Deleting scratch keychains, restoring the search list

#[macro_use]
pub mod prompts;

pub mod keychain;
pub mod runner;
pub mod validation;

// Re-export public API
pub use keychain::{SearchListGuard, TempKeychain, verify_bundle};
pub use runner::{CommandOutput, CommandRunner, SecurityCommand, SystemRunner};
