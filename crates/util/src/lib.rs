//! Utilities shared by the Guidepost engine and its hosts.
//!
//! - **`storage`**: scoped key/value persistence (`StorageService`) with JSON-file and
//!   in-memory backends
//! - **`context_expr`**: context-key expressions (`ContextExpr`)
//! - **`context`**: the ambient context service (`ContextKeyService`)
//! - **`linked_text`**: description parsing into text/link runs
//! - **`path_processing`**: tilde expansion and resource resolution

pub mod context;
pub mod context_expr;
pub mod linked_text;
pub mod path_processing;
pub mod storage;

pub use context::{ContextChange, ContextKeyService, InMemoryContextService};
pub use context_expr::{ContextExpr, ContextExprError, ContextSnapshot};
pub use linked_text::{Link, LinkedText, LinkedTextNode, parse_description, parse_linked_text};
pub use path_processing::{expand_tilde, resolve_resource};
pub use storage::{InMemoryStorage, JsonFileStorage, StorageError, StorageService, default_state_path};
