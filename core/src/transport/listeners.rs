use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;

use tracing::warn;

use crate::error::ParleyErr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportEventKind {
    Open,
    Message,
    Error,
    Close,
}

impl TransportEventKind {
    pub const ALL: [TransportEventKind; 4] = [
        TransportEventKind::Open,
        TransportEventKind::Message,
        TransportEventKind::Error,
        TransportEventKind::Close,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    /// One raw inbound text frame.
    Message(String),
    Error(ParleyErr),
    Close { code: u16, reason: String },
}

impl TransportEvent {
    pub fn kind(&self) -> TransportEventKind {
        match self {
            TransportEvent::Open => TransportEventKind::Open,
            TransportEvent::Message(_) => TransportEventKind::Message,
            TransportEvent::Error(_) => TransportEventKind::Error,
            TransportEvent::Close { .. } => TransportEventKind::Close,
        }
    }
}

/// Callback for one event kind. A listener may call back into its transport
/// (`send`, `on`); events of the kind currently being delivered that it
/// triggers are not delivered to that kind's listeners again.
pub type Listener = Box<dyn FnMut(&TransportEvent) -> anyhow::Result<()> + Send>;

/// Listener registry owned by one transport instance.
#[derive(Default)]
pub struct EventListeners {
    by_kind: HashMap<TransportEventKind, Vec<Listener>>,
}

impl EventListeners {
    pub fn on(&mut self, kind: TransportEventKind, listener: Listener) {
        self.by_kind.entry(kind).or_default().push(listener);
    }

    /// Invoke every listener registered for the event's kind, in registration
    /// order. A listener that fails or panics is logged and skipped.
    pub fn emit(&mut self, event: &TransportEvent) {
        if let Some(listeners) = self.by_kind.get_mut(&event.kind()) {
            notify(listeners, event);
        }
    }

    /// Detach the listeners of one kind so they can run without the registry
    /// borrowed.
    pub(crate) fn take(&mut self, kind: TransportEventKind) -> Vec<Listener> {
        self.by_kind.remove(&kind).unwrap_or_default()
    }

    /// Reattach listeners taken with [`EventListeners::take`]. Anything
    /// registered for `kind` in the meantime runs after them.
    pub(crate) fn restore(&mut self, kind: TransportEventKind, mut listeners: Vec<Listener>) {
        if let Some(added) = self.by_kind.remove(&kind) {
            listeners.extend(added);
        }
        if !listeners.is_empty() {
            self.by_kind.insert(kind, listeners);
        }
    }

    pub fn len(&self, kind: TransportEventKind) -> usize {
        self.by_kind.get(&kind).map_or(0, Vec::len)
    }
}

/// Run `listeners` in order. A listener that fails or panics is logged and
/// the rest still run.
pub(crate) fn notify(listeners: &mut [Listener], event: &TransportEvent) {
    for (idx, listener) in listeners.iter_mut().enumerate() {
        match catch_unwind(AssertUnwindSafe(|| listener(event))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!("{:?} listener #{idx} failed: {err:#}", event.kind());
            }
            Err(_) => {
                warn!("{:?} listener #{idx} panicked", event.kind());
            }
        }
    }
}

impl std::fmt::Debug for EventListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut dbg = f.debug_struct("EventListeners");
        for kind in TransportEventKind::ALL {
            dbg.field(&format!("{kind:?}"), &self.len(kind));
        }
        dbg.finish()
    }
}
