//! Traversal context
//!
//! Owned by the top-level call of an operation and threaded through every recursive
//! step. Holds the url sets that keep graph walks and expansions cycle-safe, and the
//! warnings collected along the way.

use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct TraversalContext {
    visited: HashSet<String>,
    expanded: HashSet<String>,
    unresolved: Vec<String>,
    messages: Vec<String>,
}

impl TraversalContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a url visited; false when it already was
    pub fn visit(&mut self, url: &str) -> bool {
        self.visited.insert(url.to_string())
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.visited.contains(url)
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    /// Mark a value set url expanded (or in progress); false when it already was
    pub fn mark_expanded(&mut self, url: &str) -> bool {
        self.expanded.insert(url.to_string())
    }

    pub fn is_expanded(&self, url: &str) -> bool {
        self.expanded.contains(url)
    }

    pub fn record_unresolved(&mut self, reference: &str) {
        if !self.unresolved.iter().any(|r| r == reference) {
            self.unresolved.push(reference.to_string());
        }
    }

    pub fn unresolved(&self) -> &[String] {
        &self.unresolved
    }

    /// Record a warning for the caller and log it
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(message = %message, "Operation warning");
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visit_is_first_wins() {
        let mut ctx = TraversalContext::new();
        assert!(ctx.visit("http://x.org/Library/a"));
        assert!(!ctx.visit("http://x.org/Library/a"));
        assert!(ctx.is_visited("http://x.org/Library/a"));
        assert_eq!(ctx.visited_count(), 1);
    }

    #[test]
    fn test_expanded_is_independent_of_visited() {
        let mut ctx = TraversalContext::new();
        ctx.visit("http://x.org/ValueSet/a");
        assert!(!ctx.is_expanded("http://x.org/ValueSet/a"));
        assert!(ctx.mark_expanded("http://x.org/ValueSet/a"));
        assert!(!ctx.mark_expanded("http://x.org/ValueSet/a"));
    }

    #[test]
    fn test_unresolved_and_messages() {
        let mut ctx = TraversalContext::new();
        ctx.record_unresolved("http://x.org/Library/missing");
        ctx.record_unresolved("http://x.org/Library/missing");
        ctx.warn("expansion failed");

        assert_eq!(ctx.unresolved(), ["http://x.org/Library/missing"]);
        assert_eq!(ctx.messages(), ["expansion failed"]);
    }
}
