use std::future::Future;
use std::pin::Pin;

use domain::common::error::DatapathError;
use domain::endpoint::entity::Endpoint;

/// Primary port for endpoint lifecycle events.
///
/// The external switch-database watcher translates interface rows into
/// these callbacks; the datapath manager implements them. An update is
/// delivered as (new, old) and is equivalent to delete + add of the
/// same identity with the learned IP preserved.
pub trait EndpointEventHandler: Send + Sync {
    fn local_endpoint_add<'a>(
        &'a self,
        endpoint: Endpoint,
    ) -> Pin<Box<dyn Future<Output = Result<(), DatapathError>> + Send + 'a>>;

    fn local_endpoint_update<'a>(
        &'a self,
        new_endpoint: Endpoint,
        old_endpoint: Endpoint,
    ) -> Pin<Box<dyn Future<Output = Result<(), DatapathError>> + Send + 'a>>;

    fn local_endpoint_delete<'a>(
        &'a self,
        endpoint: Endpoint,
    ) -> Pin<Box<dyn Future<Output = Result<(), DatapathError>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_event_handler_is_object_safe() {
        fn _check(_handler: &dyn EndpointEventHandler) {}
    }
}
