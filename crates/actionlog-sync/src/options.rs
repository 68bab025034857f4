//! Node configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use actionlog_core::{Action, Meta};
use async_trait::async_trait;

use crate::messages::Credentials;

/// Default time to wait for the peer before dropping the connection.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default silence before a `Ping` is sent.
pub const DEFAULT_PING: Duration = Duration::from_secs(10);

/// Default number of entries per `Sync` message.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;

/// Decides whether an entry is sent or accepted.
pub type Filter = Arc<dyn Fn(&Action, &Meta) -> bool + Send + Sync>;

/// Rewrites an entry before it is sent or stored.
pub type MapFn = Arc<dyn Fn(Action, Meta) -> (Action, Meta) + Send + Sync>;

/// Checks the peer's credentials during the handshake.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, node_id: &str, credentials: Option<&Credentials>) -> bool;
}

/// [`Authenticator`] backed by a plain predicate.
pub struct FnAuthenticator<F>(F);

#[async_trait]
impl<F> Authenticator for FnAuthenticator<F>
where
    F: Fn(&str, Option<&Credentials>) -> bool + Send + Sync,
{
    async fn authenticate(&self, node_id: &str, credentials: Option<&Credentials>) -> bool {
        (self.0)(node_id, credentials)
    }
}

/// Wrap a predicate as a shared authenticator.
pub fn auth_fn<F>(predicate: F) -> Arc<dyn Authenticator>
where
    F: Fn(&str, Option<&Credentials>) -> bool + Send + Sync + 'static,
{
    Arc::new(FnAuthenticator(predicate))
}

/// Options of a [`SyncNode`](crate::SyncNode).
///
/// `None` durations disable the corresponding timer.
#[derive(Clone)]
pub struct NodeOptions {
    /// Sent to the peer in the handshake.
    pub credentials: Option<Credentials>,
    /// Checks the peer's credentials. `None` accepts everyone.
    pub auth: Option<Arc<dyn Authenticator>>,
    pub timeout: Option<Duration>,
    pub ping: Option<Duration>,
    /// Correct incoming and outgoing times by the measured clock offset.
    /// Active nodes only.
    pub fix_time: bool,
    /// Initial `received` cursor. Active nodes only.
    pub synced: Option<u64>,
    /// Initial `sent` cursor. Active nodes only.
    pub other_synced: Option<u64>,
    pub in_filter: Option<Filter>,
    pub out_filter: Option<Filter>,
    pub in_map: Option<MapFn>,
    pub out_map: Option<MapFn>,
    pub max_batch_size: usize,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            credentials: None,
            auth: None,
            timeout: Some(DEFAULT_TIMEOUT),
            ping: Some(DEFAULT_PING),
            fix_time: false,
            synced: None,
            other_synced: None,
            in_filter: None,
            out_filter: None,
            in_map: None,
            out_map: None,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

impl NodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(mut self, credentials: impl Into<Credentials>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    pub fn with_auth(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_ping(mut self, ping: Option<Duration>) -> Self {
        self.ping = ping;
        self
    }

    pub fn with_fix_time(mut self, fix_time: bool) -> Self {
        self.fix_time = fix_time;
        self
    }

    pub fn with_synced(mut self, synced: u64) -> Self {
        self.synced = Some(synced);
        self
    }

    pub fn with_other_synced(mut self, other_synced: u64) -> Self {
        self.other_synced = Some(other_synced);
        self
    }

    pub fn with_in_filter(
        mut self,
        filter: impl Fn(&Action, &Meta) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.in_filter = Some(Arc::new(filter));
        self
    }

    pub fn with_out_filter(
        mut self,
        filter: impl Fn(&Action, &Meta) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.out_filter = Some(Arc::new(filter));
        self
    }

    pub fn with_in_map(
        mut self,
        map: impl Fn(Action, Meta) -> (Action, Meta) + Send + Sync + 'static,
    ) -> Self {
        self.in_map = Some(Arc::new(map));
        self
    }

    pub fn with_out_map(
        mut self,
        map: impl Fn(Action, Meta) -> (Action, Meta) + Send + Sync + 'static,
    ) -> Self {
        self.out_map = Some(Arc::new(map));
        self
    }

    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }
}

impl fmt::Debug for NodeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeOptions")
            .field("credentials", &self.credentials.is_some())
            .field("auth", &self.auth.is_some())
            .field("timeout", &self.timeout)
            .field("ping", &self.ping)
            .field("fix_time", &self.fix_time)
            .field("synced", &self.synced)
            .field("other_synced", &self.other_synced)
            .field("in_filter", &self.in_filter.is_some())
            .field("out_filter", &self.out_filter.is_some())
            .field("in_map", &self.in_map.is_some())
            .field("out_map", &self.out_map.is_some())
            .field("max_batch_size", &self.max_batch_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = NodeOptions::default();
        assert_eq!(options.timeout, Some(DEFAULT_TIMEOUT));
        assert_eq!(options.ping, Some(DEFAULT_PING));
        assert_eq!(options.max_batch_size, DEFAULT_MAX_BATCH_SIZE);
        assert!(!options.fix_time);
        assert!(options.synced.is_none() && options.other_synced.is_none());
    }

    #[tokio::test]
    async fn test_auth_fn() {
        let auth = auth_fn(|node_id, credentials| {
            node_id == "client" && credentials == Some(&serde_json::json!("secret"))
        });
        let secret = serde_json::json!("secret");
        assert!(auth.authenticate("client", Some(&secret)).await);
        assert!(!auth.authenticate("client", None).await);
        assert!(!auth.authenticate("other", Some(&secret)).await);
    }
}
