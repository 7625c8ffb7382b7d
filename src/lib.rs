#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::map_unwrap_or,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::needless_pass_by_value,
    clippy::new_without_default,
    clippy::return_self_not_must_use,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::unnecessary_lazy_evaluations
)]

//! plugdock is a host-embeddable plugin discovery and lifecycle engine.
//!
//! A long-running application points a [`host::PluginHost`] at a directory of
//! plugin artifacts. The host scans for changes, materializes artifacts into
//! live [`plugin::Plugin`]s through a chain of recognizers, isolates each one
//! in its own [`namespace::ModuleNamespace`], drives dependency-aware
//! enable/disable transitions persisted as diffs from default state, and
//! broadcasts every transition synchronously so [`tracker::ModuleTracker`]s
//! always hold a consistent view of the enabled modules of a given kind.

pub mod artifact;
pub mod events;
pub mod host;
pub mod loader;
pub mod namespace;
pub mod plugin;
pub mod scanner;
pub mod state;
pub mod tracker;

pub use artifact::Artifact;
pub use events::{EventBus, LifecycleEvent};
pub use host::{HostConfig, PluginHost, PluginState, PluginSummary};
pub use loader::{LoadOutcome, LoaderChain, Materializer, Recognizer};
pub use namespace::ModuleNamespace;
pub use plugin::{BrokenPlugin, Module, Plugin};
pub use scanner::{ScanReport, Scanner};
pub use state::{JsonFileStateStore, MemoryStateStore, StateStore};
pub use tracker::{Customizer, ModuleTracker};
