//! Concurrent table of active sites.
//!
//! Keyed by the domain name the agent declared at connect time. A
//! reconnect from the same domain supersedes the prior connection; the
//! entry itself is reused and never removed, so a disconnected site stays
//! listed and reports offline.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::error::TunnelError;
use crate::site::{RemoteSite, SiteConn, TunnelSite};

/// Registry of every site that has ever connected to this proxy.
pub struct SiteRegistry {
    heartbeat_period: Duration,
    sites: RwLock<Vec<Arc<TunnelSite>>>,
}

impl SiteRegistry {
    pub fn new(heartbeat_period: Duration) -> Self {
        Self {
            heartbeat_period,
            sites: RwLock::new(Vec::new()),
        }
    }

    /// Insert or re-initialize the site for `conn`'s domain.
    ///
    /// Holds the write lock across the swap; the prior connection's close
    /// is scheduled, not awaited, so no I/O happens under the lock.
    pub async fn upsert(&self, conn: SiteConn) -> Arc<TunnelSite> {
        let mut sites = self.sites.write().await;
        if let Some(site) = sites.iter().find(|s| s.name() == conn.domain_name) {
            site.reinit(conn);
            return site.clone();
        }
        let site = Arc::new(TunnelSite::new(
            conn.domain_name.clone(),
            self.heartbeat_period,
        ));
        site.reinit(conn);
        sites.push(site.clone());
        site
    }

    /// Handles to every registered site, in registration order.
    pub async fn list(&self) -> Vec<Arc<TunnelSite>> {
        self.sites.read().await.clone()
    }

    /// Exact lookup by domain name.
    pub async fn get_exact(&self, domain_name: &str) -> Result<Arc<TunnelSite>, TunnelError> {
        self.sites
            .read()
            .await
            .iter()
            .find(|s| s.name() == domain_name)
            .cloned()
            .ok_or_else(|| TunnelError::SiteNotFound(domain_name.to_string()))
    }

    /// Best-effort lookup: the site whose domain shares the longest
    /// right-anchored label suffix with `domain_name`. Ties resolve to
    /// the earliest registration, and a zero-length match still
    /// qualifies — any site beats none. Fails only on an empty registry.
    pub async fn find_similar(&self, domain_name: &str) -> Result<Arc<TunnelSite>, TunnelError> {
        let sites = self.sites.read().await;
        let mut best: Option<(usize, usize)> = None;
        for (index, site) in sites.iter().enumerate() {
            let similarity = suffix_match_len(domain_name, site.name());
            let better = match best {
                None => true,
                Some((_, current)) => similarity > current,
            };
            if better {
                best = Some((index, similarity));
            }
        }
        match best {
            Some((index, _)) => Ok(sites[index].clone()),
            None => Err(TunnelError::SiteNotFound(domain_name.to_string())),
        }
    }

    #[cfg(test)]
    async fn insert_detached(&self, domain_name: &str) -> Arc<TunnelSite> {
        let site = Arc::new(TunnelSite::new(
            domain_name.to_string(),
            self.heartbeat_period,
        ));
        self.sites.write().await.push(site.clone());
        site
    }
}

/// Number of equal domain labels counted from the right, stopping at the
/// first mismatch.
fn suffix_match_len(a: &str, b: &str) -> usize {
    let a: Vec<&str> = a.split('.').collect();
    let b: Vec<&str> = b.split('.').collect();
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}
