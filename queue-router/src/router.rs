//! Fan-out dispatch: matches a routed [`Container`] against every
//! subscribed [`Pattern`] and enqueues one [`Job`] per matching subscriber
//! onto the shared [`Pool`].

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use crossbeam::channel::unbounded;
use thiserror::Error;

use queue_core::Job;
use queue_core::JobError;
use queue_core::Pool;
use queue_core::PriorityTag;
use queue_messages::Container;

use crate::pattern::Pattern;

/// Identifies a single `subscribe()` call; stable across the
/// subscription's lifetime, usable for `unsubscribe()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// Observational, not treated as a hard failure: a
    /// [`TopicRouter::route`] call with zero matches still returns `Ok`
    /// with an empty [`DeliveryReport`]. This variant exists for callers
    /// who want to distinguish "matched nobody" from a real dispatch
    /// error and opt into treating it as one via `route(...)?`-style
    /// call sites that check `deliveries.is_empty()` themselves; the
    /// router itself never returns it.
    #[error("no subscriber matched topic `{0}`")]
    NoSubscribers(String),
}

/// Something a subscription runs when its pattern matches a routed
/// container's topic. Handlers are `Fn(&Container) -> Result<(), String>`
/// closures — anything a handler needs to re-route a follow-up container
/// (e.g. an `Arc<TopicRouter<P>>` clone) is captured by the closure
/// itself rather than injected by the router.
pub trait Handler: Send + Sync {
    fn handle(&self, container: &Container) -> Result<(), String>;
}

impl<F> Handler for F
where
    F: Fn(&Container) -> Result<(), String> + Send + Sync,
{
    fn handle(&self, container: &Container) -> Result<(), String> {
        self(container)
    }
}

struct Subscription<P> {
    id: SubscriptionId,
    pattern: Pattern,
    handler: Arc<dyn Handler>,
    priority: P,
}

/// One subscriber's outcome from a single [`TopicRouter::route`] call.
///
/// `result` is `None` when the job was dispatched but `route()` returned
/// before the job reported back — only possible when `route()` is called
/// from inside a handler already running on a worker thread, where
/// blocking for the outcome could deadlock against that same thread. See
/// [`TopicRouter::route`].
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub subscription: SubscriptionId,
    pub pattern: String,
    pub result: Option<Result<(), String>>,
}

/// The result of fanning one container out to its matching subscribers.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub topic: String,
    pub deliveries: Vec<DeliveryOutcome>,
}

impl DeliveryReport {
    pub fn delivered_count(&self) -> usize {
        self.deliveries.len()
    }

    pub fn failed_count(&self) -> usize {
        self.deliveries
            .iter()
            .filter(|d| matches!(d.result, Some(Err(_))))
            .count()
    }

    /// Jobs dispatched whose outcome hadn't arrived before `route()`
    /// returned (only ever non-zero for a reentrant call).
    pub fn pending_count(&self) -> usize {
        self.deliveries.iter().filter(|d| d.result.is_none()).count()
    }
}

/// Pattern-keyed subscriptions over one [`Pool`]. Routing is a plain
/// consumer of the pool — a `route()` call does not bypass the queue or
/// the workers, it just builds one [`Job`] per matching subscriber the
/// same way any other producer would.
pub struct TopicRouter<P: PriorityTag> {
    pool: Arc<Pool<P>>,
    dispatch_priority: P,
    subscriptions: Mutex<Vec<Subscription<P>>>,
    next_id: AtomicU64,
}

impl<P: PriorityTag> TopicRouter<P> {
    /// `dispatch_priority` is the priority every routed job is enqueued
    /// at; at least one attached worker must watch it (directly or as a
    /// fallback) for `route()` to make progress.
    pub fn new(pool: Arc<Pool<P>>, dispatch_priority: P) -> Self {
        TopicRouter {
            pool,
            dispatch_priority,
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Registers `handler` against `pattern`. Subscriptions to the same
    /// pattern are kept in call order, which is the fan-out order within
    /// a single pattern.
    pub fn subscribe(&self, pattern: Pattern, handler: impl Handler + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.lock().unwrap().push(Subscription {
            id,
            pattern,
            handler: Arc::new(handler),
            priority: self.dispatch_priority,
        });
        id
    }

    /// Removes a subscription. Returns `false` if `id` was already gone
    /// (or never existed).
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.lock().unwrap();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    /// Matches `container.routing_topic()` against every subscribed
    /// pattern, enqueues one job per matching subscriber, and blocks
    /// until every dispatched job has run. A handler failure is isolated
    /// — other subscribers still receive the container, and the failure
    /// is recorded in the returned report rather than aborting the call.
    ///
    /// Zero matches is not an error: `Ok` is returned with an empty
    /// `deliveries` list.
    ///
    /// A handler is free to call `route()` again on the same router (to
    /// forward a follow-up container). If that nested call is running on
    /// a worker thread — which it is, since handlers run as jobs — it
    /// cannot block waiting for the jobs it just dispatched: should every
    /// worker able to run them already be busy (starting with the very
    /// thread making this call), waiting would deadlock against itself.
    /// [`queue_core::is_worker_thread`] detects this and the nested call
    /// returns immediately instead of blocking; any outcome that hadn't
    /// arrived yet is reported as `result: None` in the returned
    /// [`DeliveryReport`] rather than waited for.
    pub fn route(&self, container: Container) -> Result<DeliveryReport, RouterError> {
        let topic = container.routing_topic().to_string();
        let matched: Vec<(SubscriptionId, String, Arc<dyn Handler>, P)> = self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.pattern.matches(&topic))
            .map(|s| (s.id, s.pattern.as_str().to_string(), s.handler.clone(), s.priority))
            .collect();

        if matched.is_empty() {
            return Ok(DeliveryReport {
                topic,
                deliveries: Vec::new(),
            });
        }

        let dispatched: Vec<(SubscriptionId, String)> = matched
            .iter()
            .map(|(id, pattern, _, _)| (*id, pattern.clone()))
            .collect();

        let (tx, rx) = unbounded::<DeliveryOutcome>();
        for (id, pattern, handler, priority) in matched {
            let container = container.clone();
            let tx = tx.clone();
            let job = Job::callback(priority, move || {
                let result = handler.handle(&container).map_err(JobError::UserFault);
                let outcome = DeliveryOutcome {
                    subscription: id,
                    pattern: pattern.clone(),
                    result: Some(result.as_ref().map(|_| ()).map_err(|e| e.to_string())),
                };
                // A full/disconnected channel would mean `route()` has
                // already given up waiting; dropping the outcome here is
                // harmless, matching the notifier non-blocking contract
                // the rest of the engine follows.
                let _ = tx.send(outcome);
                result.map(|_| ())
            });
            // A push rejected by a shut-down pool still counts as a
            // delivery attempt that failed, so route() can report it
            // instead of silently under-counting.
            if self.pool.push(job).is_err() {
                let _ = tx.send(DeliveryOutcome {
                    subscription: id,
                    pattern: String::new(),
                    result: Some(Err(
                        "pool rejected the job (push-locked or shut down)".to_string()
                    )),
                });
            }
        }
        drop(tx);

        let mut arrived = Vec::with_capacity(dispatched.len());
        if queue_core::is_worker_thread() {
            while let Ok(outcome) = rx.try_recv() {
                arrived.push(outcome);
            }
        } else {
            while arrived.len() < dispatched.len() {
                match rx.recv() {
                    Ok(outcome) => arrived.push(outcome),
                    Err(_) => break,
                }
            }
        }

        let mut by_id: std::collections::HashMap<SubscriptionId, DeliveryOutcome> =
            arrived.into_iter().map(|o| (o.subscription, o)).collect();
        let deliveries = dispatched
            .into_iter()
            .map(|(id, pattern)| {
                by_id.remove(&id).unwrap_or(DeliveryOutcome {
                    subscription: id,
                    pattern,
                    result: None,
                })
            })
            .collect();

        Ok(DeliveryReport { topic, deliveries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue_core::priority::Priority;
    use queue_core::queue::LockingQueue;
    use queue_core::queue::Queue;
    use queue_core::queue::QueueOptions;
    use queue_core::Worker;
    use queue_core::collaborators::TracingLogger;
    use queue_messages::Value;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex as StdMutex;

    fn router() -> (Arc<Pool<Priority>>, TopicRouter<Priority>) {
        let queue: Arc<dyn Queue<Priority>> = Arc::new(LockingQueue::new(QueueOptions {
            priorities: vec![Priority::RealTime, Priority::Batch, Priority::Background],
            bounded_capacity: 0,
            adaptive_promotion_threshold: 64,
        }));
        let pool = Arc::new(Pool::new(queue));
        pool.append(
            Worker::new(Priority::Batch, vec![]),
            true,
            Arc::new(TracingLogger),
        )
        .unwrap();
        let router = TopicRouter::new(pool.clone(), Priority::Batch);
        (pool, router)
    }

    fn container(topic: &str) -> Container {
        Container::builder()
            .message_type(topic)
            .add(Value::string("topic", topic))
            .build()
    }

    #[test]
    fn routed_container_fans_out_to_every_matching_pattern() {
        let (pool, router) = router();
        let fired: Arc<StdMutex<Vec<&'static str>>> = Arc::new(StdMutex::new(Vec::new()));

        let f = fired.clone();
        router.subscribe(Pattern::parse("user.*").unwrap(), move |_c: &Container| {
            f.lock().unwrap().push("h1");
            Ok(())
        });
        let f = fired.clone();
        router.subscribe(
            Pattern::parse("user.created").unwrap(),
            move |_c: &Container| {
                f.lock().unwrap().push("h2");
                Ok(())
            },
        );
        let f = fired.clone();
        router.subscribe(Pattern::parse("user.#").unwrap(), move |_c: &Container| {
            f.lock().unwrap().push("h3");
            Ok(())
        });

        let report = router.route(container("user.created")).unwrap();
        assert_eq!(report.delivered_count(), 3);
        assert_eq!(report.failed_count(), 0);
        let fired = fired.lock().unwrap();
        assert_eq!(fired.len(), 3);
        assert!(fired.contains(&"h1"));
        assert!(fired.contains(&"h2"));
        assert!(fired.contains(&"h3"));

        pool.stop(true);
    }

    #[test]
    fn no_matching_subscribers_is_not_an_error() {
        let (pool, router) = router();
        let report = router.route(container("nothing.listens.here")).unwrap();
        assert_eq!(report.delivered_count(), 0);
        pool.stop(true);
    }

    #[test]
    fn one_handler_failure_does_not_stop_the_others() {
        let (pool, router) = router();
        router.subscribe(Pattern::parse("order.*").unwrap(), |_c: &Container| {
            Err("boom".to_string())
        });
        let delivered = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let d = delivered.clone();
        router.subscribe(Pattern::parse("order.*").unwrap(), move |_c: &Container| {
            d.store(true, Ordering::SeqCst);
            Ok(())
        });

        let report = router.route(container("order.placed")).unwrap();
        assert_eq!(report.delivered_count(), 2);
        assert_eq!(report.failed_count(), 1);
        assert!(delivered.load(Ordering::SeqCst));
        pool.stop(true);
    }

    #[test]
    fn unsubscribe_stops_further_delivery() {
        let (pool, router) = router();
        let id = router.subscribe(Pattern::parse("x.y").unwrap(), |_c: &Container| Ok(()));
        assert!(router.unsubscribe(id));
        assert!(!router.unsubscribe(id));
        let report = router.route(container("x.y")).unwrap();
        assert_eq!(report.delivered_count(), 0);
        pool.stop(true);
    }

    #[test]
    fn handler_re_routing_from_a_worker_thread_does_not_deadlock() {
        let (pool, router) = router();
        let router = Arc::new(router);
        let delivered_to_swapped = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let d = delivered_to_swapped.clone();
        router.subscribe(
            Pattern::parse("request.ping").unwrap(),
            {
                let router = router.clone();
                move |c: &Container| {
                    let mut follow_up = c.copy(true);
                    follow_up.swap_header();
                    // Re-entering route() from inside this handler runs on
                    // the same worker thread that would otherwise have to
                    // process the jobs this call dispatches — it must not
                    // block waiting for them.
                    let nested = router.route(follow_up).unwrap();
                    assert_eq!(nested.pending_count(), nested.delivered_count());
                    Ok(())
                }
            },
        );
        router.subscribe(Pattern::parse("request.ping").unwrap(), move |c: &Container| {
            // The re-routed follow-up keeps the same message_type/topic;
            // this subscriber only marks completion, the swapped-header
            // container itself is what a real deployment would route to
            // a *different* topic derived from the new target.
            let _ = c;
            d.store(true, Ordering::SeqCst);
            Ok(())
        });

        let original = Container::builder()
            .source(1, 0)
            .target(2, 0)
            .message_type("request.ping")
            .add(Value::string("topic", "request.ping"))
            .build();
        let report = router.route(original).unwrap();
        assert_eq!(report.delivered_count(), 2);
        assert_eq!(report.pending_count(), 0);
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(delivered_to_swapped.load(Ordering::SeqCst));
        pool.stop(true);
    }
}
