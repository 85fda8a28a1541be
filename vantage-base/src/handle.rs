use std::fmt;

/// Identifies an element on the host's document surface. The host allocates these, the runtime
/// only compares and hashes them.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElementId(pub u64);

impl fmt::Debug for ElementId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "ElementId({})", self.0)
    }
}

/// Loading ID allocated by the resource manager to track a registered resource. A handle is never
/// reused, so a completion carrying an old handle can always be told apart from a newer
/// registration of the same element.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct LoadHandle(pub u64);

impl LoadHandle {
    pub fn new(index: u64) -> Self {
        LoadHandle(index)
    }
}
