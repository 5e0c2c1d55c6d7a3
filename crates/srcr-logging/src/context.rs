//! Node context injection for multi-node logging
//!
//! A simulation runs many engines on one thread. [`NodeContextGuard`] marks
//! the node whose code is running: it stores the node in thread-local
//! storage and enters a `node` span, so every event emitted in its scope
//! carries the node address in the JSONL output.

use std::cell::RefCell;

use srcr_core::NodeAddr;
use tracing::span::EnteredSpan;
use uuid::Uuid;

/// Node context stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContextData {
    pub node: NodeAddr,
    /// Short form used in log fields
    pub node_id: String,
    /// Unique id of this node instance (one per engine lifetime)
    pub instance_id: Uuid,
}

thread_local! {
    static NODE_CONTEXT: RefCell<Option<NodeContextData>> = const { RefCell::new(None) };
}

/// RAII guard for node context
///
/// Restores the previous context (if any) when dropped, so guards nest.
///
/// ```ignore
/// let _guard = NodeContextGuard::new(node);
/// tracing::info!("Processing packet"); // carries node = "A"
/// ```
pub struct NodeContextGuard {
    previous: Option<NodeContextData>,
    _span: EnteredSpan,
}

impl NodeContextGuard {
    /// Set `node` as the current node with a fresh instance id
    pub fn new(node: NodeAddr) -> Self {
        Self::with_instance_id(node, Uuid::new_v4())
    }

    /// Set `node` as the current node with a fixed instance id
    pub fn with_instance_id(node: NodeAddr, instance_id: Uuid) -> Self {
        let data = NodeContextData {
            node,
            node_id: node.short_id(),
            instance_id,
        };
        let previous = NODE_CONTEXT.with(|ctx| ctx.borrow_mut().replace(data.clone()));

        // Entered after the context is set so the layer sees it on the new span
        let span = tracing::info_span!(
            "node",
            node = %data.node_id,
            instance = %data.instance_id
        )
        .entered();

        Self {
            previous,
            _span: span,
        }
    }

    /// The current node context (if any)
    pub fn current() -> Option<NodeContextData> {
        NODE_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    pub fn current_node() -> Option<NodeAddr> {
        Self::current().map(|ctx| ctx.node)
    }

    pub fn current_node_id() -> Option<String> {
        Self::current().map(|ctx| ctx.node_id)
    }

    pub fn current_instance_id() -> Option<Uuid> {
        Self::current().map(|ctx| ctx.instance_id)
    }
}

impl Drop for NodeContextGuard {
    fn drop(&mut self) {
        NODE_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

/// Run a block with a node context set
///
/// ```ignore
/// with_node_context!(node, {
///     tracing::info!("Processing packet");
/// });
/// ```
#[macro_export]
macro_rules! with_node_context {
    ($node:expr, $body:block) => {{
        let _guard = $crate::context::NodeContextGuard::new($node);
        $body
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_id(c: char) -> NodeAddr {
        NodeAddr::from_letter(c).unwrap()
    }

    #[test]
    fn test_node_context_guard() {
        assert!(NodeContextGuard::current().is_none());

        {
            let _guard = NodeContextGuard::new(make_id('A'));
            let ctx = NodeContextGuard::current().unwrap();
            assert_eq!(ctx.node, make_id('A'));
            assert_eq!(ctx.node_id, "A");
        }

        assert!(NodeContextGuard::current().is_none());
    }

    #[test]
    fn test_nested_contexts() {
        {
            let _guard_a = NodeContextGuard::new(make_id('A'));
            assert_eq!(NodeContextGuard::current_node_id(), Some("A".to_string()));

            {
                let _guard_b = NodeContextGuard::new(make_id('B'));
                assert_eq!(NodeContextGuard::current_node(), Some(make_id('B')));
            }

            // Restored to A after B's guard drops
            assert_eq!(NodeContextGuard::current_node(), Some(make_id('A')));
        }

        assert!(NodeContextGuard::current_node().is_none());
    }

    #[test]
    fn test_with_instance_id() {
        let instance_id = Uuid::new_v4();
        let _guard = NodeContextGuard::with_instance_id(make_id('X'), instance_id);
        assert_eq!(NodeContextGuard::current_instance_id(), Some(instance_id));
    }

    #[test]
    fn test_macro_scopes_context() {
        let seen = with_node_context!(make_id('C'), { NodeContextGuard::current_node_id() });
        assert_eq!(seen, Some("C".to_string()));
        assert!(NodeContextGuard::current().is_none());
    }

    #[test]
    fn test_non_letter_address() {
        let node: NodeAddr = "192.168.1.20".parse().unwrap();
        let _guard = NodeContextGuard::new(node);
        assert_eq!(
            NodeContextGuard::current_node_id(),
            Some("192.168.1.20".to_string())
        );
    }
}
