//! Scheduling primitives that line work up with the host's frame and idle callbacks.
//!
//! Nothing in here owns a clock or a thread. The host tells us when a frame or idle period
//! arrives, and we tell the host (through [`FrameRequester`]) when we need one.

mod frame;
pub use frame::FrameRequester;
pub use frame::IdleDeadline;

mod surface;
pub use surface::DocumentSurface;

mod batch;
pub use batch::BatchScheduler;
pub use batch::CycleStats;
pub use batch::Pending;
pub use batch::Phase;

mod task_loop;
pub use task_loop::TaskLoop;

mod idle;
pub use idle::IdleQueue;
