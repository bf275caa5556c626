//! Route resolution for decoded requests.

use std::sync::Arc;

use crate::metadata::MessageMetadata;

/// A resolved route.
pub trait Route: Send + Sync {
    /// The upstream cluster this route selects.
    fn cluster(&self) -> &str;
}

/// Maps a request to a route, or to nothing.
pub trait Router: Send + Sync {
    /// Resolve a route for the request described by `metadata`.
    /// `stream_id` correlates the lookup with observability data.
    fn route(&self, metadata: &MessageMetadata, stream_id: u64) -> Option<Arc<dyn Route>>;
}

impl<F> Router for F
where
    F: Fn(&MessageMetadata, u64) -> Option<Arc<dyn Route>> + Send + Sync,
{
    fn route(&self, metadata: &MessageMetadata, stream_id: u64) -> Option<Arc<dyn Route>> {
        self(metadata, stream_id)
    }
}

/// A router that never resolves a route.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullRouter;

impl Router for NullRouter {
    fn route(&self, _metadata: &MessageMetadata, _stream_id: u64) -> Option<Arc<dyn Route>> {
        None
    }
}

/// A route naming a fixed cluster.
#[derive(Clone, Debug)]
pub struct ClusterRoute {
    cluster: String,
}

impl ClusterRoute {
    /// Create a route to `cluster`.
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }
}

impl Route for ClusterRoute {
    fn cluster(&self) -> &str { &self.cluster }
}
