//! Output multiplexer: replay cache plus zero-or-one attached transport.
//!
//! Every event is appended to the cache before it is written to the
//! transport, so a client that reattaches later receives the full history
//! of the session's output in production order.

use tokio::sync::mpsc;
use tracing::debug;

use crate::models::event::Event;

/// Sending half of a client transport.
pub type TransportSender = mpsc::UnboundedSender<Event>;

#[derive(Debug)]
struct Attached {
    tx: TransportSender,
    generation: u64,
}

/// Ordered, unbounded event log with a swappable live transport.
#[derive(Debug, Default)]
pub struct Multiplexer {
    cache: Vec<Event>,
    transport: Option<Attached>,
    generations: u64,
}

impl Multiplexer {
    /// Empty cache, nothing attached.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `event` and forward it to the attached transport, if any.
    ///
    /// A transport whose receiver has gone away is not an error; the event
    /// stays in the cache for the next attach.
    pub fn emit(&mut self, event: Event) {
        if let Some(attached) = &self.transport {
            if attached.tx.send(event.clone()).is_err() {
                debug!(generation = attached.generation, "transport closed, event cached only");
            }
        }
        self.cache.push(event);
    }

    /// Swap in a new transport and replay the cache onto it.
    ///
    /// `greeting` is delivered first, then every previously cached event,
    /// then it is itself appended to the cache. Replacing a transport drops
    /// the previous sender, which ends that client's stream.
    ///
    /// Returns the generation identifying this attachment.
    pub fn attach(&mut self, tx: TransportSender, greeting: Option<Event>) -> u64 {
        self.generations += 1;
        let generation = self.generations;

        if let Some(event) = &greeting {
            let _ = tx.send(event.clone());
        }
        for event in &self.cache {
            if tx.send(event.clone()).is_err() {
                break;
            }
        }
        if let Some(event) = greeting {
            self.cache.push(event);
        }

        self.transport = Some(Attached { tx, generation });
        generation
    }

    /// Drop the transport if it is still the one identified by `generation`.
    ///
    /// Returns `false` for a stale generation (a newer transport took over).
    pub fn detach(&mut self, generation: u64) -> bool {
        if self.generation() == Some(generation) {
            self.transport = None;
            true
        } else {
            false
        }
    }

    /// Drop whatever transport is attached.
    pub fn clear_transport(&mut self) {
        self.transport = None;
    }

    /// Generation of the current transport.
    #[must_use]
    pub fn generation(&self) -> Option<u64> {
        self.transport.as_ref().map(|attached| attached.generation)
    }

    /// Whether a transport with a live receiver is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.transport
            .as_ref()
            .is_some_and(|attached| !attached.tx.is_closed())
    }

    /// Cached events in production order.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.cache
    }

    /// Number of cached events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether nothing has been emitted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
