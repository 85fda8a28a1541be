/// A primary source and the alternates to try, in order, when it fails. Every source is tried
/// once.
#[derive(Clone, Debug)]
pub struct FallbackChain {
    sources: Vec<String>,
    index: usize,
    failed_attempts: u32,
}

impl FallbackChain {
    pub fn new(
        primary: impl Into<String>,
        alternates: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut sources = vec![primary.into()];
        sources.extend(alternates.into_iter().map(Into::into));
        FallbackChain {
            sources,
            index: 0,
            failed_attempts: 0,
        }
    }

    /// The source to try next, None once every source has failed
    pub fn current(&self) -> Option<&str> {
        self.sources.get(self.index).map(String::as_str)
    }

    // Position of the current source, 0 is the primary
    pub fn current_index(&self) -> usize {
        self.index
    }

    /// Record a failure of the current source and move to the next one
    pub fn advance(&mut self) -> Option<&str> {
        if self.is_exhausted() {
            return None;
        }

        self.failed_attempts += 1;
        self.index += 1;
        self.current()
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.index >= self.sources.len()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn walks_alternates_once_each() {
        let mut chain = FallbackChain::new("/a.jpg", ["/b.jpg", "/c.jpg"]);
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.current(), Some("/a.jpg"));
        assert_eq!(chain.advance(), Some("/b.jpg"));
        assert_eq!(chain.advance(), Some("/c.jpg"));
        assert_eq!(chain.failed_attempts(), 2);
        assert!(!chain.is_exhausted());

        assert_eq!(chain.advance(), None);
        assert!(chain.is_exhausted());
        assert_eq!(chain.failed_attempts(), 3);

        // Further advances don't count
        assert_eq!(chain.advance(), None);
        assert_eq!(chain.failed_attempts(), 3);
    }

    #[test]
    fn primary_only() {
        let mut chain = FallbackChain::new("/a.jpg", Vec::<String>::new());
        assert_eq!(chain.advance(), None);
        assert!(chain.is_exhausted());
    }
}
