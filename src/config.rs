//! Connection-manager configuration.
//!
//! [`Config`] is the abstract surface the manager consumes: codec
//! factories, a router, a filter chain factory and a stats scope.
//! [`ProxyConfig`] covers the common case of selecting built-in codecs
//! through a builder; embedders with exotic transports or protocols
//! implement [`Config`] directly.

use std::sync::Arc;

use crate::{
    filter::{EmptyFilterChainFactory, FilterChainFactory},
    protocol::{new_protocol, Protocol, ProtocolType},
    router::{NullRouter, Router},
    stats::ProxyStats,
    transport::{new_transport, Transport, TransportType},
};

/// Abstract configuration surface consumed by the connection manager.
pub trait Config: Send + Sync {
    /// Build a downstream transport codec.
    fn create_transport(&self) -> Box<dyn Transport>;

    /// Build a downstream protocol codec.
    fn create_protocol(&self) -> Box<dyn Protocol>;

    /// The router resolving requests to upstreams.
    fn router(&self) -> &dyn Router;

    /// The factory installing each request's filter chain.
    fn filter_factory(&self) -> &dyn FilterChainFactory;

    /// The stats scope for connections using this configuration.
    fn stats(&self) -> &ProxyStats;
}

/// Configuration over the built-in codec types.
pub struct ProxyConfig {
    transport: TransportType,
    protocol: ProtocolType,
    router: Arc<dyn Router>,
    filter_factory: Arc<dyn FilterChainFactory>,
    stats: ProxyStats,
}

impl ProxyConfig {
    /// Start building a configuration.
    #[must_use]
    pub fn builder() -> ProxyConfigBuilder { ProxyConfigBuilder::default() }
}

impl Config for ProxyConfig {
    fn create_transport(&self) -> Box<dyn Transport> { new_transport(self.transport) }

    fn create_protocol(&self) -> Box<dyn Protocol> { new_protocol(self.protocol) }

    fn router(&self) -> &dyn Router { self.router.as_ref() }

    fn filter_factory(&self) -> &dyn FilterChainFactory { self.filter_factory.as_ref() }

    fn stats(&self) -> &ProxyStats { &self.stats }
}

/// Builder for [`ProxyConfig`].
///
/// Defaults: framed transport, binary protocol, a router that resolves
/// nothing, an empty filter chain and a fresh stats scope.
pub struct ProxyConfigBuilder {
    transport: TransportType,
    protocol: ProtocolType,
    router: Arc<dyn Router>,
    filter_factory: Arc<dyn FilterChainFactory>,
    stats: ProxyStats,
}

impl Default for ProxyConfigBuilder {
    fn default() -> Self {
        Self {
            transport: TransportType::Framed,
            protocol: ProtocolType::Binary,
            router: Arc::new(NullRouter),
            filter_factory: Arc::new(EmptyFilterChainFactory),
            stats: ProxyStats::new(),
        }
    }
}

impl ProxyConfigBuilder {
    /// Select the downstream transport.
    #[must_use]
    pub fn transport(mut self, transport: TransportType) -> Self {
        self.transport = transport;
        self
    }

    /// Select the downstream protocol.
    #[must_use]
    pub fn protocol(mut self, protocol: ProtocolType) -> Self {
        self.protocol = protocol;
        self
    }

    /// Install the router.
    #[must_use]
    pub fn router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = router;
        self
    }

    /// Install the filter chain factory.
    #[must_use]
    pub fn filter_factory(mut self, filter_factory: Arc<dyn FilterChainFactory>) -> Self {
        self.filter_factory = filter_factory;
        self
    }

    /// Use an existing stats scope instead of a fresh one.
    #[must_use]
    pub fn stats(mut self, stats: ProxyStats) -> Self {
        self.stats = stats;
        self
    }

    /// Finish the configuration.
    #[must_use]
    pub fn build(self) -> ProxyConfig {
        ProxyConfig {
            transport: self.transport,
            protocol: self.protocol,
            router: self.router,
            filter_factory: self.filter_factory,
            stats: self.stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_are_framed_binary() {
        let config = ProxyConfig::builder().build();
        assert_eq!(config.create_transport().transport_type(), TransportType::Framed);
        assert_eq!(config.create_protocol().protocol_type(), ProtocolType::Binary);
        assert!(config
            .router()
            .route(&crate::metadata::MessageMetadata::new(), 1)
            .is_none());
    }

    #[test]
    fn builder_selects_unframed() {
        let config = ProxyConfig::builder().transport(TransportType::Unframed).build();
        assert_eq!(config.create_transport().transport_type(), TransportType::Unframed);
    }
}
