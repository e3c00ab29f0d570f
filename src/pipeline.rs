//! Ordered per-capability handler sequences.
//!
//! A [`Pipeline`] holds six ordered sequences, one per event capability.
//! Registration appends a handler to every sequence its declared
//! capabilities match, with one deliberate asymmetry: the write sequence is
//! kept in reverse registration order. A framing codec registered early
//! therefore sees raw bytes first on input and produces raw bytes last on
//! output, making protocol layering symmetric.
//!
//! Pipelines are assembled before a service starts and shared immutably
//! (`Arc<Pipeline>`) across every session the service spawns, so iteration
//! needs no locking.

use std::sync::Arc;

use crate::{
    error::{Error, Result},
    handler::{Capabilities, Handler},
};

/// Ordered collection of session event handlers.
#[derive(Clone, Default)]
pub struct Pipeline {
    connect: Vec<Arc<dyn Handler>>,
    read: Vec<Arc<dyn Handler>>,
    write: Vec<Arc<dyn Handler>>,
    timeout: Vec<Arc<dyn Handler>>,
    disconnect: Vec<Arc<dyn Handler>>,
    error: Vec<Arc<dyn Handler>>,
}

impl Pipeline {
    /// Create an empty pipeline.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register a handler in every sequence its capabilities match.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCapability`] if the handler declares an empty
    /// capability set.
    pub fn register(&mut self, handler: Arc<dyn Handler>) -> Result<()> {
        let caps = handler.capabilities();
        if caps.is_empty() {
            return Err(Error::NoCapability);
        }
        if caps.contains(Capabilities::CONNECT) {
            self.connect.push(Arc::clone(&handler));
        }
        if caps.contains(Capabilities::READ) {
            self.read.push(Arc::clone(&handler));
        }
        if caps.contains(Capabilities::WRITE) {
            // Reverse registration order on the outbound path.
            self.write.insert(0, Arc::clone(&handler));
        }
        if caps.contains(Capabilities::TIMEOUT) {
            self.timeout.push(Arc::clone(&handler));
        }
        if caps.contains(Capabilities::DISCONNECT) {
            self.disconnect.push(Arc::clone(&handler));
        }
        if caps.contains(Capabilities::ERROR) {
            self.error.push(handler);
        }
        Ok(())
    }

    /// Connect handlers in registration order.
    #[must_use]
    pub fn connect_handlers(&self) -> &[Arc<dyn Handler>] { &self.connect }

    /// Read handlers in registration order.
    #[must_use]
    pub fn read_handlers(&self) -> &[Arc<dyn Handler>] { &self.read }

    /// Write handlers in reverse registration order.
    #[must_use]
    pub fn write_handlers(&self) -> &[Arc<dyn Handler>] { &self.write }

    /// Timeout handlers in registration order.
    #[must_use]
    pub fn timeout_handlers(&self) -> &[Arc<dyn Handler>] { &self.timeout }

    /// Disconnect handlers in registration order.
    #[must_use]
    pub fn disconnect_handlers(&self) -> &[Arc<dyn Handler>] { &self.disconnect }

    /// Error handlers in registration order.
    #[must_use]
    pub fn error_handlers(&self) -> &[Arc<dyn Handler>] { &self.error }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("connect", &self.connect.len())
            .field("read", &self.read.len())
            .field("write", &self.write.len())
            .field("timeout", &self.timeout.len())
            .field("disconnect", &self.disconnect.len())
            .field("error", &self.error.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    struct Tagged {
        tag: &'static str,
        caps: Capabilities,
    }

    #[async_trait]
    impl Handler for Tagged {
        fn capabilities(&self) -> Capabilities { self.caps }
    }

    fn tags(handlers: &[Arc<dyn Handler>], lookup: &[(&'static str, *const ())]) -> Vec<&'static str> {
        handlers
            .iter()
            .map(|h| {
                let ptr = Arc::as_ptr(h).cast::<()>();
                lookup
                    .iter()
                    .find(|(_, p)| std::ptr::eq(*p, ptr))
                    .map(|(tag, _)| *tag)
                    .expect("registered handler")
            })
            .collect()
    }

    fn register_tagged(caps: Capabilities, tag: &'static str, pipeline: &mut Pipeline) -> (&'static str, *const ()) {
        let handler: Arc<dyn Handler> = Arc::new(Tagged { tag, caps });
        let ptr = Arc::as_ptr(&handler).cast::<()>();
        pipeline.register(handler).expect("register");
        (tag, ptr)
    }

    #[test]
    fn read_order_is_registration_write_order_is_reversed() {
        let mut pipeline = Pipeline::new();
        let caps = Capabilities::READ | Capabilities::WRITE;
        let lookup = vec![
            register_tagged(caps, "h1", &mut pipeline),
            register_tagged(caps, "h2", &mut pipeline),
            register_tagged(caps, "h3", &mut pipeline),
        ];

        assert_eq!(tags(pipeline.read_handlers(), &lookup), ["h1", "h2", "h3"]);
        assert_eq!(tags(pipeline.write_handlers(), &lookup), ["h3", "h2", "h1"]);
    }

    #[test]
    fn multi_capability_handler_lands_in_each_sequence() {
        let mut pipeline = Pipeline::new();
        let caps = Capabilities::CONNECT
            | Capabilities::READ
            | Capabilities::TIMEOUT
            | Capabilities::DISCONNECT
            | Capabilities::ERROR;
        register_tagged(caps, "all", &mut pipeline);

        assert_eq!(pipeline.connect_handlers().len(), 1);
        assert_eq!(pipeline.read_handlers().len(), 1);
        assert_eq!(pipeline.timeout_handlers().len(), 1);
        assert_eq!(pipeline.disconnect_handlers().len(), 1);
        assert_eq!(pipeline.error_handlers().len(), 1);
        assert!(pipeline.write_handlers().is_empty());
    }

    #[test]
    fn empty_capability_set_is_a_configuration_error() {
        let mut pipeline = Pipeline::new();
        let handler: Arc<dyn Handler> = Arc::new(Tagged {
            tag: "none",
            caps: Capabilities::empty(),
        });
        assert!(matches!(pipeline.register(handler), Err(Error::NoCapability)));
    }
}
