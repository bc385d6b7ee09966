use log::{debug, warn};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 64;

/// Coarse invalidation broadcast. Receivers drop everything they cache for
/// any signal they care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvalidationSignal {
    ConfigFilesChanged,
    ExecutableChanged,
    SettingsChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Signal(InvalidationSignal),
    /// The receiver fell behind and lost this many signals; treat as if every
    /// signal was delivered.
    Missed(u64),
}

impl Delivery {
    #[must_use]
    pub fn affects(&self, signals: &[InvalidationSignal]) -> bool {
        match self {
            Delivery::Signal(signal) => signals.contains(signal),
            Delivery::Missed(_) => true,
        }
    }
}

/// Session-scoped event bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<InvalidationSignal>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, signal: InvalidationSignal) {
        match self.sender.send(signal) {
            Ok(receivers) => debug!("Published {signal:?} to {receivers} subscriber(s)"),
            Err(_) => debug!("Published {signal:?} with no subscribers"),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> Subscriber {
        Subscriber {
            receiver: self.sender.subscribe(),
        }
    }
}

#[derive(Debug)]
pub struct Subscriber {
    receiver: broadcast::Receiver<InvalidationSignal>,
}

impl Subscriber {
    /// Waits for the next delivery; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        match self.receiver.recv().await {
            Ok(signal) => Some(Delivery::Signal(signal)),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Invalidation subscriber lagged, {missed} signal(s) missed");
                Some(Delivery::Missed(missed))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}
