/*!
View consumers: pluggable analyses run over every received view.

A consumer is a stateful processor implementing [`Consumer`]; the
[`ConsumerManager`] runs a chain of them in registration order. Consumers
must not block for long, since the caller typically sits in a receive loop.
*/
mod perfmonitor;
mod visibility;

pub use perfmonitor::PerfMonitor;
pub use visibility::{Visibility, VisibilityStats};

use crate::error::WatcherError;
use crate::msg::ViewInterests;
use crate::view::View;
use log::{info, warn};

pub trait Consumer {
    fn name(&self) -> &'static str;

    /// Processes one received view; `interests` is the classification the
    /// server attached when publishing it.
    fn process_view(
        &mut self,
        interests: ViewInterests,
        view: &View,
    ) -> Result<(), WatcherError>;
}

/// Runs registered consumers over each view in order.
#[derive(Default)]
pub struct ConsumerManager {
    consumers: Vec<Box<dyn Consumer>>,
}

impl ConsumerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, consumer: Box<dyn Consumer>) {
        info!("registered consumer {}", consumer.name());
        self.consumers.push(consumer);
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    /// Hands the view to every consumer; a failing consumer is logged and
    /// the rest of the chain still runs.
    pub fn process_view(&mut self, interests: ViewInterests, view: &View) {
        for consumer in &mut self.consumers {
            if let Err(e) = consumer.process_view(interests, view) {
                warn!("consumer {} failed: {e}", consumer.name());
            }
        }
    }
}
