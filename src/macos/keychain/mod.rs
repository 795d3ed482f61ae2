//! Keychain operations for macOS
//!
//! This module provides functionality for:
//! - Creating and deleting scratch keychains
//! - Scoped changes to the user search list
//! - Listing and pruning signing identities
//! - Exporting identities to PKCS#12 and verifying the result

mod export;
mod identity;
mod search_list;
mod temp;
mod verify;

// Re-export public APIs
pub use export::{export_all_identities, export_identity};
pub use identity::{Identity, find_identities, normalize_hash, parse_identities};
pub use search_list::{SearchListGuard, current_search_list, parse_keychain_list};
pub use temp::{TempKeychain, random_password, remove_stale};
pub use verify::verify_bundle;
