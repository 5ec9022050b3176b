//! Routing-key → handler registry

use futures::future::BoxFuture;
use msgbus::{
    prepare_route, CodecError, DomainMessage, DynamicMessage, HandlerError, RoutingKey,
    RoutingKeyError, RoutingKeyPattern,
};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("invalid route {route:?}: {source}")]
    InvalidRoute {
        route: String,
        #[source]
        source: RoutingKeyError,
    },

    #[error("route registered twice: {0}")]
    DuplicateRoute(String),
}

/// A type-erased handler: decodes the payload, then yields the handler future.
pub(crate) trait ErasedHandler: Send + Sync {
    fn payload_type(&self) -> &str;

    fn prepare(
        &self,
        routing_key: RoutingKey,
        msg: &DynamicMessage,
    ) -> Result<BoxFuture<'static, Result<(), HandlerError>>, CodecError>;
}

struct TypedHandler<M, F> {
    handler: F,
    _payload: PhantomData<fn() -> M>,
}

impl<M, F, Fut, E> ErasedHandler for TypedHandler<M, F>
where
    M: DomainMessage,
    F: Fn(RoutingKey, M) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<HandlerError> + 'static,
{
    fn payload_type(&self) -> &str {
        M::TYPE_NAME
    }

    fn prepare(
        &self,
        routing_key: RoutingKey,
        msg: &DynamicMessage,
    ) -> Result<BoxFuture<'static, Result<(), HandlerError>>, CodecError> {
        let payload: M = msg.unwrap_into()?;
        let fut = (self.handler)(routing_key, payload);
        Ok(Box::pin(async move { fut.await.map_err(Into::into) }))
    }
}

struct RawHandler<F> {
    handler: F,
}

impl<F, Fut, E> ErasedHandler for RawHandler<F>
where
    F: Fn(RoutingKey, DynamicMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<HandlerError> + 'static,
{
    fn payload_type(&self) -> &str {
        "*"
    }

    fn prepare(
        &self,
        routing_key: RoutingKey,
        msg: &DynamicMessage,
    ) -> Result<BoxFuture<'static, Result<(), HandlerError>>, CodecError> {
        let fut = (self.handler)(routing_key, msg.clone());
        Ok(Box::pin(async move { fut.await.map_err(Into::into) }))
    }
}

/// Immutable mapping from routing key to handler.
///
/// Exact keys are looked up directly. Wildcard routes are tried afterwards in
/// registration order, first match wins. Several routes may share one
/// handler function.
pub struct HandlerTable {
    exact: HashMap<RoutingKey, Arc<dyn ErasedHandler>>,
    wildcard: Vec<(RoutingKeyPattern, Arc<dyn ErasedHandler>)>,
}

impl HandlerTable {
    pub fn builder() -> HandlerTableBuilder {
        HandlerTableBuilder::default()
    }

    pub(crate) fn lookup(&self, key: &RoutingKey) -> Option<&Arc<dyn ErasedHandler>> {
        self.exact.get(key).or_else(|| {
            self.wildcard
                .iter()
                .find(|(pattern, _)| pattern.matches(key))
                .map(|(_, handler)| handler)
        })
    }

    pub fn contains(&self, key: &RoutingKey) -> bool {
        self.lookup(key).is_some()
    }

    /// Every route in the table, suitable for registration
    pub fn routes(&self) -> Vec<RoutingKeyPattern> {
        let mut routes: Vec<RoutingKeyPattern> = self
            .exact
            .keys()
            .cloned()
            .map(RoutingKeyPattern::from)
            .collect();
        routes.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        routes.extend(self.wildcard.iter().map(|(p, _)| p.clone()));
        routes
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.wildcard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct HandlerTableBuilder {
    org: Option<String>,
    entries: Vec<(String, Arc<dyn ErasedHandler>)>,
}

impl HandlerTableBuilder {
    /// Organization substituted for `{org}` in every route at build time
    pub fn org(mut self, org: impl Into<String>) -> Self {
        self.org = Some(org.into());
        self
    }

    /// Route `route` to a handler taking the decoded payload `M`.
    pub fn on<M, F, Fut, E>(mut self, route: &str, handler: F) -> Self
    where
        M: DomainMessage,
        F: Fn(RoutingKey, M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<HandlerError> + 'static,
    {
        let handler = TypedHandler {
            handler,
            _payload: PhantomData,
        };
        self.entries.push((route.to_string(), Arc::new(handler)));
        self
    }

    /// Route `route` to a handler that takes the payload undecoded
    pub fn on_raw<F, Fut, E>(mut self, route: &str, handler: F) -> Self
    where
        F: Fn(RoutingKey, DynamicMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<HandlerError> + 'static,
    {
        self.entries
            .push((route.to_string(), Arc::new(RawHandler { handler })));
        self
    }

    pub fn build(self) -> Result<HandlerTable, TableError> {
        let mut exact = HashMap::new();
        let mut wildcard: Vec<(RoutingKeyPattern, Arc<dyn ErasedHandler>)> = Vec::new();

        for (route, handler) in self.entries {
            let pattern = match &self.org {
                Some(org) => prepare_route(org, &route),
                None => RoutingKeyPattern::parse(&route),
            }
            .map_err(|source| TableError::InvalidRoute {
                route: route.clone(),
                source,
            })?;

            match pattern.to_routing_key() {
                Some(key) => {
                    if exact.insert(key, handler).is_some() {
                        return Err(TableError::DuplicateRoute(route));
                    }
                }
                None => {
                    if wildcard.iter().any(|(p, _)| *p == pattern) {
                        return Err(TableError::DuplicateRoute(route));
                    }
                    wildcard.push((pattern, handler));
                }
            }
        }

        Ok(HandlerTable { exact, wildcard })
    }
}
