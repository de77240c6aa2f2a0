pub mod cli;

pub mod change_log;
mod change_processor;
pub mod config;
pub mod descriptor;
pub mod dispatcher;
pub mod host;
pub mod interface;
pub mod logging;
pub mod merge;
pub mod reconstruct;
pub mod scan;
pub mod sorting;
pub mod tree_store;
pub mod web;

pub use change_log::ChangeLogRoot;
pub use config::CanopyConfig;
pub use descriptor::{Descriptor, DescriptorKind};
pub use dispatcher::{DispatcherState, UpdateDispatcher};
pub use host::{EventSender, Host, HostError};
pub use interface::{
    ChangeDescriptor, ChangeEvent, ChangesResponse, DeltaBatch, FetchError, FullSnapshot,
    HostNotification, RawEvent, RootInfo, TreeSource,
};
pub use merge::{merge_changes, MergeOutcome};
pub use sorting::{Collation, SortConfig, SortKey};
pub use tree_store::{ClientTreeStore, RootRecord, StoreEvent};
