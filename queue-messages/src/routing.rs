use std::fmt;

use serde_derive::Serialize;

use crate::container::Container;

/// A container's routing topic paired with a numeric priority hint.
///
/// A small, container-derived convenience kept separate from `Container`
/// itself since not every producer needs it; not consulted by the queue
/// or worker's own priority-based dequeue fallback, which operates
/// directly on the generic `P` a worker carries.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct RoutingKey {
    domain: String,
    priority: u64,
}

impl RoutingKey {
    pub fn new(domain: impl Into<String>, priority: u64) -> Self {
        RoutingKey {
            domain: domain.into(),
            priority,
        }
    }

    /// Derives a routing key from a container: its routing topic as the
    /// domain, plus a caller-supplied priority hint.
    pub fn from_container(container: &Container, priority: u64) -> Self {
        RoutingKey::new(container.routing_topic(), priority)
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn priority(&self) -> u64 {
        self.priority
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.domain, self.priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    #[test]
    fn derives_domain_from_routing_topic() {
        let c = Container::builder().message_type("user.created").build();
        let key = RoutingKey::from_container(&c, 3);
        assert_eq!(key.domain(), "user.created");
        assert_eq!(key.priority(), 3);

        let c2 = Container::builder()
            .message_type("user.created")
            .add(Value::string("topic", "user.created.v2"))
            .build();
        assert_eq!(RoutingKey::from_container(&c2, 0).domain(), "user.created.v2");
    }
}
