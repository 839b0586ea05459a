//! A lightweight actor runtime.
//!
//! An actor is a tokio task that exclusively owns a state value. Other tasks
//! talk to it through an [`Actor`] handle by sending [`Message`]s, which are
//! handled one at a time with mutable access to the state. No locking is
//! needed around the state since nothing else can reach it.
//!
//! The actor stops when it is killed or when the last handle is dropped.
//! In both cases [`ActorState::on_stop`] runs before the state is dropped,
//! which is where owned background work should be released.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod error;
mod handle;
mod runner;

pub use error::ActorDeadError;
pub use handle::Actor;

/// The state owned by an actor.
pub trait ActorState: Send + 'static {
    /// Invoked once when the actor stops, before the state is dropped.
    fn on_stop(&mut self) {}
}

/// A message that an actor with state `S` can handle.
pub trait Message<S>: Send + 'static {
    /// Handles the message with mutable access to the actor's state.
    fn handle(self, state: &mut S, handle: &Actor<S>);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use tokio::sync::oneshot;
    use tokio::time::timeout;

    use super::*;

    #[derive(Default)]
    struct Counter {
        value: u32,
        stopped: Arc<AtomicBool>,
    }

    impl ActorState for Counter {
        fn on_stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    struct Add(u32);

    impl Message<Counter> for Add {
        fn handle(self, state: &mut Counter, _handle: &Actor<Counter>) {
            state.value += self.0;
        }
    }

    struct Get(oneshot::Sender<u32>);

    impl Message<Counter> for Get {
        fn handle(self, state: &mut Counter, _handle: &Actor<Counter>) {
            self.0.send(state.value).ok();
        }
    }

    #[tokio::test]
    async fn test_send_message() {
        let actor = Actor::spawn(Counter::default(), Some("counter"));
        actor.send(Add(40)).unwrap();
        actor.send(Add(2)).unwrap();

        let (tx, rx) = oneshot::channel();
        actor.send(Get(tx)).unwrap();
        assert_eq!(rx.await.unwrap(), 42);

        let doubled = actor.ask(|state| state.value * 2).await.unwrap();
        assert_eq!(doubled, 84);
    }

    #[tokio::test]
    async fn test_kill_runs_stop_hook() {
        let stopped = Arc::new(AtomicBool::new(false));
        let actor = Actor::spawn(
            Counter {
                value: 0,
                stopped: Arc::clone(&stopped),
            },
            None,
        );
        actor.kill();
        timeout(Duration::from_millis(500), actor.stopped())
            .await
            .unwrap();
        assert!(stopped.load(Ordering::SeqCst));
        assert!(actor.ask(|state| state.value).await.is_err());
    }

    #[tokio::test]
    async fn test_stops_when_handles_dropped() {
        let stopped = Arc::new(AtomicBool::new(false));
        let actor = Actor::spawn(
            Counter {
                value: 0,
                stopped: Arc::clone(&stopped),
            },
            None,
        );
        let watcher = actor.watch_stopped();
        drop(actor);
        timeout(Duration::from_millis(500), watcher)
            .await
            .unwrap();
        assert!(stopped.load(Ordering::SeqCst));
    }
}
