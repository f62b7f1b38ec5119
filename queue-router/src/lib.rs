//! Pattern-based topic subscriptions over a [`queue_core::Pool`], derived
//! from the [`queue_messages::Container`] the rest of the engine already
//! moves through the queue.
//!
//! A [`TopicRouter`] holds no state the pool doesn't already own: routing
//! is a consumer of the pool the same way a handler is, fanning a single
//! [`Container`](queue_messages::Container) out to one [`Job`](queue_core::Job)
//! per matching subscriber.

mod pattern;
mod router;

pub use pattern::Pattern;
pub use pattern::PatternError;
pub use router::DeliveryOutcome;
pub use router::DeliveryReport;
pub use router::Handler;
pub use router::RouterError;
pub use router::SubscriptionId;
pub use router::TopicRouter;
