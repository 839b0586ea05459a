use std::any::type_name;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::Instrument;

use crate::runner::{Envelope, Runner};
use crate::{ActorDeadError, ActorState, Message};

pub(crate) struct Shared<S> {
    msg_tx: mpsc::UnboundedSender<Envelope<S>>,
    kill_tx: watch::Sender<bool>,
    stopped_rx: watch::Receiver<bool>,
}

/// Handle to an actor.
pub struct Actor<S> {
    shared: Arc<Shared<S>>,
}

impl<S: ActorState> Actor<S> {
    /// Spawns a new actor owning `state`, with an optional label used in
    /// tracing spans.
    pub fn spawn(state: S, label: Option<&str>) -> Self {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = watch::channel(false);
        let (stopped_tx, stopped_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            msg_tx,
            kill_tx,
            stopped_rx,
        });

        let runner = Runner {
            shared: Arc::downgrade(&shared),
            state,
            msg_rx,
            kill_rx,
            stopped_tx,
        };
        tokio::spawn(runner.run().instrument(trace_span!("actor", label)));
        Self { shared }
    }

    #[inline]
    pub(crate) fn from_shared(shared: Arc<Shared<S>>) -> Self {
        Self { shared }
    }

    /// Sends a message to the actor.
    pub fn send<M: Message<S>>(&self, msg: M) -> Result<(), ActorDeadError> {
        self.send_envelope(Envelope {
            label: type_name::<M>(),
            f: Box::new(move |state, handle| msg.handle(state, handle)),
        })
    }

    /// Runs `f` against the state and returns its output.
    pub async fn ask<R, F>(&self, f: F) -> Result<R, ActorDeadError>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_envelope(Envelope {
            label: "ask",
            f: Box::new(move |state, _| {
                reply_tx.send(f(state)).ok();
            }),
        })?;
        reply_rx.await.map_err(|_| ActorDeadError)
    }

    fn send_envelope(&self, envelope: Envelope<S>) -> Result<(), ActorDeadError> {
        self.shared.msg_tx.send(envelope).map_err(|_| ActorDeadError)
    }

    /// Asks the actor to stop.
    ///
    /// Messages already queued are discarded. The stop hook still runs.
    #[inline]
    pub fn kill(&self) {
        self.shared.kill_tx.send(true).ok();
    }

    /// Returns `true` until the actor has stopped.
    #[inline]
    pub fn is_alive(&self) -> bool {
        !*self.shared.stopped_rx.borrow()
    }

    /// Waits until the actor has stopped.
    #[inline]
    pub async fn stopped(&self) {
        self.watch_stopped().await
    }

    /// Returns a future resolving when the actor has stopped, which does not
    /// keep the actor alive.
    pub fn watch_stopped(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut stopped_rx = self.shared.stopped_rx.clone();
        async move {
            // A closed channel means the runner is gone as well.
            stopped_rx.wait_for(|stopped| *stopped).await.ok();
        }
    }
}

impl<S> Clone for Actor<S> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}
