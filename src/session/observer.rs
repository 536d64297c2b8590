//! Observer events and the "agent speaking" heuristic

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};

use crate::session::state::SessionState;

/// Advisory notifications for the UI layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged { state: SessionState },
    /// An inbound chunk was scheduled for playback
    AudioChunk { samples: usize },
    /// The remote agent was barged in on; queued audio was silenced
    Interrupted,
    /// The remote agent finished its turn
    TurnComplete,
    /// Debounced edge of the speaking indicator
    AgentSpeaking { speaking: bool },
    Error { message: String },
}

/// Receives session events.
///
/// Called with no session lock held, so it may query or drive the
/// controller. It should not block: delivery happens on whichever thread
/// produced the event.
pub trait SessionObserver: Send + Sync + 'static {
    fn on_event(&self, event: SessionEvent);
}

impl<F> SessionObserver for F
where
    F: Fn(SessionEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: SessionEvent) {
        self(event)
    }
}

impl SessionObserver for mpsc::UnboundedSender<SessionEvent> {
    fn on_event(&self, event: SessionEvent) {
        let _ = self.send(event);
    }
}

impl SessionObserver for broadcast::Sender<SessionEvent> {
    fn on_event(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.send(event);
    }
}

#[derive(Default)]
struct RelayQueue {
    events: VecDeque<SessionEvent>,
    delivering: bool,
}

/// Ordered delivery of session events to one observer.
///
/// `post` queues an event while the caller still holds the lock that made
/// it true, so the queue follows the order things happened. `deliver` runs
/// once that lock is released. One caller drains at a time; a caller that
/// arrives mid-drain, including the observer re-entering through the
/// controller, leaves its events to the active drainer.
pub struct EventRelay {
    observer: Arc<dyn SessionObserver>,
    queue: Mutex<RelayQueue>,
}

impl EventRelay {
    pub fn new(observer: Arc<dyn SessionObserver>) -> Arc<Self> {
        Arc::new(Self {
            observer,
            queue: Mutex::new(RelayQueue::default()),
        })
    }

    pub fn post(&self, event: SessionEvent) {
        self.queue.lock().events.push_back(event);
    }

    /// Hand queued events to the observer. Call with no session lock held.
    pub fn deliver(&self) {
        {
            let mut queue = self.queue.lock();
            if queue.delivering {
                return;
            }
            queue.delivering = true;
        }

        loop {
            let event = {
                let mut queue = self.queue.lock();
                match queue.events.pop_front() {
                    Some(event) => event,
                    None => {
                        queue.delivering = false;
                        return;
                    }
                }
            };
            self.observer.on_event(event);
        }
    }

    pub fn emit(&self, event: SessionEvent) {
        self.post(event);
        self.deliver();
    }
}

struct IndicatorState {
    speaking: bool,
    deadline: Instant,
    /// Bumped whenever a speaking period ends so stale timers bail out
    period: u64,
}

/// Infers "agent speaking" from inbound audio traffic.
///
/// Speaking starts with the first chunk and ends once no chunk has arrived
/// for the debounce window, or immediately on interruption. This is a
/// traffic heuristic, not voice activity.
pub struct SpeakingIndicator {
    debounce: Duration,
    relay: Arc<EventRelay>,
    state: Mutex<IndicatorState>,
}

impl SpeakingIndicator {
    pub fn new(debounce: Duration, relay: Arc<EventRelay>) -> Arc<Self> {
        Arc::new(Self {
            debounce,
            relay,
            state: Mutex::new(IndicatorState {
                speaking: false,
                deadline: Instant::now(),
                period: 0,
            }),
        })
    }

    /// Record an inbound chunk. Must be called inside a Tokio runtime.
    pub fn chunk_received(self: &Arc<Self>) {
        let mut state = self.state.lock();
        state.deadline = Instant::now() + self.debounce;
        if state.speaking {
            return;
        }

        state.speaking = true;
        let period = state.period;
        self.relay.post(SessionEvent::AgentSpeaking { speaking: true });
        drop(state);
        self.relay.deliver();

        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let deadline = {
                    let state = this.state.lock();
                    if state.period != period || !state.speaking {
                        return;
                    }
                    state.deadline
                };

                sleep_until(deadline).await;

                let mut state = this.state.lock();
                if state.period != period || !state.speaking {
                    return;
                }
                if Instant::now() >= state.deadline {
                    this.end_period(&mut state);
                    drop(state);
                    this.relay.deliver();
                    return;
                }
            }
        });
    }

    /// End the speaking period now
    pub fn clear(&self) {
        let mut state = self.state.lock();
        if state.speaking {
            self.end_period(&mut state);
            drop(state);
            self.relay.deliver();
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.state.lock().speaking
    }

    fn end_period(&self, state: &mut IndicatorState) {
        state.speaking = false;
        state.period += 1;
        self.relay.post(SessionEvent::AgentSpeaking { speaking: false });
    }
}
