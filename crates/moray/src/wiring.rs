//! Glue between the auth and tunnel domains.

use std::sync::Arc;

use async_trait::async_trait;

use moray_auth::AuthServer;
use moray_tunnel::trust::AuthorityProvider;
use moray_tunnel::TunnelError;

/// Feeds the tunnel's trust oracle from the auth server's CA store.
pub struct AuthorityAdapter(pub Arc<AuthServer>);

#[async_trait]
impl AuthorityProvider for AuthorityAdapter {
    async fn host_authority_keys(&self) -> Result<Vec<String>, TunnelError> {
        self.0
            .host_authority_keys()
            .await
            .map_err(|e| TunnelError::Provider(e.to_string()))
    }
}
