pub mod visibility;
pub use visibility::{
    IntersectionEntry, IntersectionHost, RootMargin, VisibilityConfig, VisibilityEvent,
    VisibilityState, VisibilityTracker,
};

pub mod storage;
pub use storage::{HandleOp, LoadOp, ResourceLoader, ResourceUnloader};

mod load_queue;

pub mod loader;
pub use loader::{
    LoadRecord, ResourceManager, ResourceManagerConfig, ResourceOptions, ResourceState,
    StateChange,
};

pub use vantage_base::{ElementId, LoadHandle};

// Resource states:
//   Idle     - registered, not wanted yet (never visible, or cancelled before it started)
//   Queued   - visible, waiting for a free loading slot
//   Loading  - loader has been called, waiting on the LoadOp
//   Loaded   - data is held by the manager
//   Unloaded - was loaded, data was handed to the unloader after going hidden
//   Failed   - the LoadOp reported an error or was dropped. Terminal until retry()
//
// Idle/Unloaded -> Queued on visible
// Queued -> Idle on hidden
// Queued -> Loading when a slot frees up, highest priority first, FIFO on ties
// Loading -> Loaded | Failed when the LoadOp resolves
// Loaded -> Unloaded on hidden, only if an unloader was provided
// Failed -> Idle (-> Queued if visible) on retry()
//
// Every load attempt gets a new version. Completions carrying an old version, or a handle that
// has been unregistered, are dropped.

#[cfg(test)]
mod tests;
