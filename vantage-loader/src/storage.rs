use crossbeam_channel::Sender;
use std::error::Error;
use std::fmt;
use vantage_base::{ElementId, LoadHandle};

/// Result of a load attempt, sent from a [`LoadOp`] back to the
/// [`ResourceManager`](crate::ResourceManager). The `u32` is the load version the op was created
/// for.
pub enum HandleOp<T> {
    Error(LoadHandle, u32, Box<dyn Error>),
    Complete(LoadHandle, u32, T),
    Drop(LoadHandle, u32),
}

impl<T> fmt::Debug for HandleOp<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            HandleOp::Error(handle, version, error) => f
                .debug_tuple("Error")
                .field(handle)
                .field(version)
                .field(&error.to_string())
                .finish(),
            HandleOp::Complete(handle, version, _) => f
                .debug_tuple("Complete")
                .field(handle)
                .field(version)
                .finish(),
            HandleOp::Drop(handle, version) => {
                f.debug_tuple("Drop").field(handle).field(version).finish()
            }
        }
    }
}

/// Lets a [`ResourceLoader`] signal that a load has finished, possibly much later (for example
/// when a network request resolves). Exactly one of `complete` or `error` should be called.
/// Dropping the op without calling either counts as a failure.
pub struct LoadOp<T> {
    sender: Option<Sender<HandleOp<T>>>,
    handle: LoadHandle,
    version: u32,
}

impl<T> LoadOp<T> {
    pub(crate) fn new(
        sender: Sender<HandleOp<T>>,
        handle: LoadHandle,
        version: u32,
    ) -> Self {
        Self {
            sender: Some(sender),
            handle,
            version,
        }
    }

    /// Returns the `LoadHandle` associated with the load operation
    pub fn load_handle(&self) -> LoadHandle {
        self.handle
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Signals that this load operation has completed succesfully.
    pub fn complete(
        mut self,
        data: T,
    ) {
        log::debug!("LoadOp for {:?} complete", self.handle);
        if let Some(sender) = self.sender.take() {
            // The manager may be gone, in which case nobody cares about the result
            let _ = sender.send(HandleOp::Complete(self.handle, self.version, data));
        }
    }

    /// Signals that this load operation has completed with an error.
    pub fn error<E: Error + 'static>(
        mut self,
        error: E,
    ) {
        log::debug!("LoadOp for {:?} error {}", self.handle, error);
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(HandleOp::Error(self.handle, self.version, Box::new(error)));
        }
    }
}

impl<T> Drop for LoadOp<T> {
    fn drop(&mut self) {
        if let Some(ref sender) = self.sender {
            let _ = sender.send(HandleOp::Drop(self.handle, self.version));
        }
    }
}

impl<T> fmt::Debug for LoadOp<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("LoadOp")
            .field("handle", &self.handle)
            .field("version", &self.version)
            .finish()
    }
}

/// Produces the data for a resource. Called when the resource reaches the front of the load
/// queue. The implementation resolves `load_op` whenever the data is ready, which may be during
/// this call or later.
pub trait ResourceLoader<T> {
    fn load(
        &mut self,
        target: ElementId,
        load_op: LoadOp<T>,
    );
}

impl<T, F: FnMut(ElementId, LoadOp<T>)> ResourceLoader<T> for F {
    fn load(
        &mut self,
        target: ElementId,
        load_op: LoadOp<T>,
    ) {
        (self)(target, load_op)
    }
}

/// Frees a loaded resource after it leaves the viewport. This is purely memory reclamation, so
/// errors are logged and otherwise ignored.
pub trait ResourceUnloader<T> {
    fn unload(
        &mut self,
        target: ElementId,
        data: T,
    ) -> Result<(), Box<dyn Error>>;
}

impl<T, F: FnMut(ElementId, T) -> Result<(), Box<dyn Error>>> ResourceUnloader<T> for F {
    fn unload(
        &mut self,
        target: ElementId,
        data: T,
    ) -> Result<(), Box<dyn Error>> {
        (self)(target, data)
    }
}
