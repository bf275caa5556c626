//! Decoder filters and the per-request callbacks they operate through.
//!
//! Filters observe the decoder event stream of one request and decide
//! whether decoding proceeds. A filter that needs to wait (for a route,
//! an upstream connection, a quota) returns
//! [`FilterStatus::StopIteration`] and resumes the connection later via
//! `continue_decoding`.

use std::sync::Arc;

use bytes::BytesMut;

use crate::{
    decoder::{DecoderEvent, FilterStatus},
    downstream::DownstreamConnection,
    metadata::MessageMetadata,
    protocol::Protocol,
    reply::DirectResponse,
    router::Route,
    transport::Transport,
};

/// One filter in a request's decoder filter chain.
///
/// Every method defaults to pass-through, so a filter implements only the
/// events it cares about.
pub trait DecoderFilter: Send {
    /// The request envelope has been decoded. The metadata is available
    /// through [`DecoderFilterCallbacks::metadata`].
    fn message_begin(&mut self, callbacks: &mut dyn DecoderFilterCallbacks) -> FilterStatus {
        let _ = callbacks;
        FilterStatus::Continue
    }

    /// A body or boundary event has been decoded.
    fn event(
        &mut self,
        event: &DecoderEvent,
        callbacks: &mut dyn DecoderFilterCallbacks,
    ) -> FilterStatus {
        let _ = (event, callbacks);
        FilterStatus::Continue
    }

    /// The response path hit an error; any pending upstream for this
    /// request should be torn down.
    fn reset_upstream_connection(&mut self) {}

    /// The request is being reset (connection close, decode failure).
    /// Cancellation of pending upstream work belongs here.
    fn on_reset(&mut self) {}
}

/// Capabilities a decoder filter may exercise against its request.
pub trait DecoderFilterCallbacks {
    /// Proxy-internal id correlating this request with logs and traces.
    /// Unrelated to the Thrift sequence id.
    fn stream_id(&self) -> u64;

    /// The request envelope, once decoded.
    fn metadata(&self) -> Option<&MessageMetadata>;

    /// The downstream connection carrying this request.
    fn downstream(&mut self) -> &mut dyn DownstreamConnection;

    /// Resume a paused dispatch loop.
    fn continue_decoding(&mut self);

    /// Resolve (and memoize) the route for this request. A router that
    /// declines is not retried; without metadata there is no route.
    fn route(&mut self) -> Option<Arc<dyn Route>>;

    /// Write a locally synthesised reply carrying this request's original
    /// sequence id, then retire the request.
    fn send_local_reply(&mut self, response: &dyn DirectResponse);

    /// Install the response decoder for this request, parameterised by the
    /// upstream's transport and protocol. Must be called exactly once.
    fn start_upstream_response(&mut self, transport: Box<dyn Transport>, protocol: Box<dyn Protocol>);

    /// Feed upstream response bytes through the response decoder.
    /// Returns whether the response is complete.
    fn upstream_data(&mut self, data: &mut BytesMut) -> bool;

    /// Close the downstream connection without flushing.
    fn reset_downstream_connection(&mut self);
}

/// Installs decoder filters on a new request.
pub trait FilterChainFactoryCallbacks {
    /// Append `filter` to the request's chain.
    fn add_decoder_filter(&mut self, filter: Box<dyn DecoderFilter>);
}

/// Builds the filter chain for each request.
pub trait FilterChainFactory: Send + Sync {
    /// Install filters for one request via `callbacks`.
    fn create_filter_chain(&self, callbacks: &mut dyn FilterChainFactoryCallbacks);
}

impl<F> FilterChainFactory for F
where
    F: Fn(&mut dyn FilterChainFactoryCallbacks) + Send + Sync,
{
    fn create_filter_chain(&self, callbacks: &mut dyn FilterChainFactoryCallbacks) {
        self(callbacks);
    }
}

/// A factory that installs no filters.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyFilterChainFactory;

impl FilterChainFactory for EmptyFilterChainFactory {
    fn create_filter_chain(&self, _callbacks: &mut dyn FilterChainFactoryCallbacks) {}
}
