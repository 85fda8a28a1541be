/// The host's next-frame and next-idle primitive.
///
/// Implementations should only *request* the callback here. The host delivers the frame later by
/// calling back into whichever scheduler asked for it. Calling back synchronously from inside
/// `request_frame` is tolerated but defeats the batching.
pub trait FrameRequester {
    fn request_frame(&self);

    fn request_idle(&self) {
        // Hosts without idle callbacks get a frame instead
        self.request_frame();
    }
}

/// How much of the current idle period is left
pub trait IdleDeadline {
    // In milliseconds
    fn time_remaining(&self) -> f64;

    fn did_timeout(&self) -> bool {
        false
    }
}
