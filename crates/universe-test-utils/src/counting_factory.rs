//! Substrate factory wrapper that counts connections.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use universe::substrate::SubstrateFactory;
use universe::Result;

/// Wraps a factory and counts `connect` calls across clones.
#[derive(Debug, Clone)]
pub struct CountingFactory<F> {
    inner: F,
    connects: Arc<AtomicUsize>,
}

impl<F> CountingFactory<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<F: SubstrateFactory> SubstrateFactory for CountingFactory<F> {
    type Substrate = F::Substrate;
    type Bindings = F::Bindings;

    async fn connect(&self) -> Result<F::Substrate> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.inner.connect().await
    }
}
