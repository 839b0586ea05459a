use std::sync::Weak;

use tokio::select;
use tokio::sync::{mpsc, watch};

use crate::handle::Shared;
use crate::{Actor, ActorState};

pub(crate) struct Envelope<S> {
    pub label: &'static str,
    pub f: Box<dyn FnOnce(&mut S, &Actor<S>) + Send>,
}

pub(crate) struct Runner<S> {
    pub shared: Weak<Shared<S>>,
    pub state: S,
    pub msg_rx: mpsc::UnboundedReceiver<Envelope<S>>,
    pub kill_rx: watch::Receiver<bool>,
    pub stopped_tx: watch::Sender<bool>,
}

impl<S: ActorState> Runner<S> {
    pub async fn run(mut self) {
        debug!("started");
        loop {
            let envelope = select! {
                biased;

                _ = self.kill_rx.wait_for(|killed| *killed) => {
                    debug!("killed");
                    break;
                }
                envelope = self.msg_rx.recv() => {
                    let Some(envelope) = envelope else {
                        break;
                    };
                    envelope
                }
            };

            // Handles only live while a message is processed, so the actor
            // can notice when every outside handle is gone.
            let Some(shared) = self.shared.upgrade() else {
                warn!("all handles dropped, discarding {}", envelope.label);
                break;
            };
            let handle = Actor::from_shared(shared);
            trace_span!("proc msg", msg = envelope.label).in_scope(|| {
                (envelope.f)(&mut self.state, &handle);
            });
        }

        self.msg_rx.close();
        self.state.on_stop();
        self.stopped_tx.send_replace(true);
        debug!("stopped");
    }
}
