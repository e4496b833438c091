//! Single-slot handoff between a suspended recompute loop and the driver that resolves
//! its frames.

use crate::error::{FrameError, panic_message};
use futures::FutureExt;
use futures::channel::oneshot;
use recompose_scheduler::Lock;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

/// Nominal frame time in nanoseconds.
pub type FrameTime = u64;

type RequestHook = Box<dyn Fn() + Send + Sync>;

/// The time source of a recompute loop.
///
/// The loop asks for a frame with [`FrameClock::with_frame`] and suspends; the request
/// sits in the clock until a driver takes it with [`FrameClock::take_request`] and
/// executes it. At most one request can be outstanding; asking for a second one is a
/// bug and panics.
#[derive(Clone)]
pub struct FrameClock {
    shared: Arc<ClockShared>,
}

struct ClockShared {
    slot: Lock<FrameSlot>,
    generations: AtomicU64,
    on_request: RequestHook,
}

enum FrameSlot {
    Empty,
    Outstanding {
        generation: u64,
        request: Box<dyn PendingFrame>,
    },
}

impl FrameClock {
    /// `on_request` is called, outside the clock's lock, every time a request is
    /// published.
    pub fn new<F>(on_request: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(ClockShared {
                slot: Lock::new(FrameSlot::Empty),
                generations: AtomicU64::new(0),
                on_request: Box::new(on_request),
            }),
        }
    }

    /// Suspend until a driver executes a frame, then resolve to whatever `on_frame`
    /// returned for it. `on_frame` runs on the driver's thread.
    ///
    /// The request is published the first time the returned future is polled. Dropping
    /// the future withdraws a request nobody has taken yet.
    pub fn with_frame<T, F>(&self, on_frame: F) -> WithFrame<T>
    where
        T: Send + 'static,
        F: FnOnce(FrameTime) -> T + Send + 'static,
    {
        WithFrame {
            clock: Arc::clone(&self.shared),
            state: WithFrameState::Init(Box::new(on_frame)),
        }
    }

    /// Take the outstanding request, leaving the slot empty.
    pub fn take_request(&self) -> Option<FrameRequest> {
        self.shared.slot.with_lock(|slot| {
            match std::mem::replace(slot, FrameSlot::Empty) {
                FrameSlot::Empty => None,
                FrameSlot::Outstanding { request, .. } => Some(FrameRequest { inner: request }),
            }
        })
    }

    pub fn has_request(&self) -> bool {
        self.shared
            .slot
            .with_lock(|slot| matches!(slot, FrameSlot::Outstanding { .. }))
    }
}

impl std::fmt::Debug for FrameClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameClock")
            .field("has_request", &self.has_request())
            .finish()
    }
}

/// A frame the loop is waiting on. Executing it runs the loop's frame callback on the
/// calling thread and hands the outcome back to the suspended loop.
#[must_use = "the recompute loop stays suspended until the request is executed"]
pub struct FrameRequest {
    inner: Box<dyn PendingFrame>,
}

impl FrameRequest {
    /// Run the frame callback. A panic inside it is caught, reported to the loop, and
    /// returned here as [`FrameError::Panicked`].
    pub fn execute(self, frame_time: FrameTime) -> Result<(), FrameError> {
        self.inner.execute(frame_time)
    }
}

impl std::fmt::Debug for FrameRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRequest").finish_non_exhaustive()
    }
}

trait PendingFrame: Send {
    fn execute(self: Box<Self>, frame_time: FrameTime) -> Result<(), FrameError>;
}

struct TypedRequest<T> {
    on_frame: Box<dyn FnOnce(FrameTime) -> T + Send>,
    sink: oneshot::Sender<Result<T, FrameError>>,
}

impl<T: Send> PendingFrame for TypedRequest<T> {
    fn execute(self: Box<Self>, frame_time: FrameTime) -> Result<(), FrameError> {
        let TypedRequest { on_frame, sink } = *self;
        match catch_unwind(AssertUnwindSafe(|| on_frame(frame_time))) {
            Ok(value) => {
                // The loop may already be gone; nothing to report to then.
                let _ = sink.send(Ok(value));
                Ok(())
            }
            Err(payload) => {
                let error = FrameError::Panicked(panic_message(&*payload));
                let _ = sink.send(Err(error.clone()));
                Err(error)
            }
        }
    }
}

/// Future returned by [`FrameClock::with_frame`].
#[must_use = "futures do nothing unless polled"]
pub struct WithFrame<T> {
    clock: Arc<ClockShared>,
    state: WithFrameState<T>,
}

enum WithFrameState<T> {
    Init(Box<dyn FnOnce(FrameTime) -> T + Send>),
    Waiting {
        generation: u64,
        outcome: oneshot::Receiver<Result<T, FrameError>>,
    },
    Done,
}

impl<T: Send + 'static> Future for WithFrame<T> {
    type Output = Result<T, FrameError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        let published = match std::mem::replace(&mut this.state, WithFrameState::Done) {
            WithFrameState::Init(on_frame) => {
                this.state = this.clock.publish(on_frame);
                true
            }
            other => {
                this.state = other;
                false
            }
        };
        if published {
            (this.clock.on_request)();
        }

        match &mut this.state {
            WithFrameState::Waiting { outcome, .. } => match outcome.poll_unpin(cx) {
                Poll::Ready(result) => {
                    this.state = WithFrameState::Done;
                    Poll::Ready(result.unwrap_or(Err(FrameError::Abandoned)))
                }
                Poll::Pending => Poll::Pending,
            },
            WithFrameState::Done | WithFrameState::Init(_) => {
                panic!("WithFrame polled after completion")
            }
        }
    }
}

impl ClockShared {
    fn publish<T: Send + 'static>(
        &self,
        on_frame: Box<dyn FnOnce(FrameTime) -> T + Send>,
    ) -> WithFrameState<T> {
        let (sink, outcome) = oneshot::channel();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let request = Box::new(TypedRequest { on_frame, sink });

        let published = self.slot.with_lock(|slot| {
            if let FrameSlot::Outstanding { .. } = slot {
                return false;
            }
            *slot = FrameSlot::Outstanding {
                generation,
                request,
            };
            true
        });
        if !published {
            panic!(
                "concurrent frame request: a frame was requested while another is still outstanding"
            );
        }

        WithFrameState::Waiting {
            generation,
            outcome,
        }
    }
}

impl<T> Drop for WithFrame<T> {
    fn drop(&mut self) {
        let WithFrameState::Waiting { generation, .. } = self.state else {
            return;
        };
        // Withdraw our request if the driver hasn't taken it.
        let withdrawn = self.clock.slot.with_lock(|slot| match slot {
            FrameSlot::Outstanding {
                generation: current,
                ..
            } if *current == generation => Some(std::mem::replace(slot, FrameSlot::Empty)),
            _ => None,
        });
        drop(withdrawn);
    }
}
