//! Walkthrough registry and step completion tracking.
//!
//! The crate registers catalogs of walkthroughs, turns each step's completion events into
//! typed triggers, delivers host and context events to the steps listening for them, and
//! persists progress and per-walkthrough metadata through a `StorageService`.
//!
//! `WalkthroughEngine` is the usual entry point; `WalkthroughRegistry` can be driven
//! directly when the host wants to own the background tasks.

pub mod catalog;
pub mod completion;
pub mod config;
pub mod context_watcher;
pub mod contributions;
pub mod dispatcher;
pub mod engine;
pub mod errors;
pub mod host_events;
pub mod registry;
pub mod resolver;
pub mod services;
pub mod stores;

pub use catalog::{CatalogDocument, CatalogFormat, builtin_walkthroughs, load_catalog_file, parse_catalog};
pub use completion::{CompletionEventError, ParsedTrigger, effective_completion_events, parse_completion_event, step_triggers};
pub use config::{CONFIG_PATH_ENV, EngineConfig, default_config_path};
pub use context_watcher::{ContextWatcher, spawn_context_watcher};
pub use contributions::{ContributedMedia, ContributedStep, ContributedWalkthrough, ContributionError, ExtensionContribution, ExtensionWalkthroughs};
pub use dispatcher::EventDispatcher;
pub use engine::{WalkthroughEngine, default_services};
pub use errors::RegistryError;
pub use host_events::{HostEvent, spawn_host_event_pump};
pub use registry::{NEW_WELCOME_EXPERIENCE, RegistryEvent, WalkthroughRegistry};
pub use resolver::{RECENCY_WINDOW_DAYS, RankedWalkthrough};
pub use services::{
    Clock, ExperimentService, GlobWorkspaceSearch, ManualClock, NoExperiments, NoWorkspace, RegistryServices, StaticExperiments,
    SystemClock, WorkspaceFileSearch,
};
pub use stores::{HiddenWalkthroughs, MetadataStore, ProgressStore, WalkthroughMetadata};
