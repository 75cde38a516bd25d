//! Per-connection context threaded through dispatch: the façade handle,
//! the session's capability token, and defaults from configuration.

use std::sync::Arc;
use std::time::Duration;

use spalloc_facade::AllocatorFacade;

/// Immutable service-principal capability token identifying who this
/// session is acting on behalf of (spec §3 Session; security itself is
/// out of scope — see spec §1 Non-goals).
#[derive(Debug, Clone)]
pub struct Principal(pub String);

#[derive(Clone)]
pub struct SessionContext {
    pub facade: Arc<dyn AllocatorFacade>,
    pub principal: Principal,
    pub peer_addr: Option<String>,
    pub default_keepalive: Duration,
}
