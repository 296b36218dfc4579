//! Network and domain reconciliation.
//!
//! Merges three sources of port information: the user's `networks`, the
//! ports the builder detected on the artifact, and backend-allocated
//! subdomains. User-provided values always win; the reconciler never flips
//! `public`, never rewrites `port_type`, and never touches a non-empty
//! `domain`.

use crate::domain::{infer_port_type, FlexInt, HealthCheck, NetworkPort};
use crate::infrastructure::backend::{BackendReporter, UpdateServiceRequest};
use std::collections::BTreeMap;
use tracing::{debug, info};

pub struct Reconciler {
    backend: BackendReporter,
    cluster_domain: String,
}

impl Reconciler {
    pub fn new(backend: BackendReporter, cluster_domain: impl Into<String>) -> Self {
        Self {
            backend,
            cluster_domain: cluster_domain.into(),
        }
    }

    /// Reconcile `networks` in place against the artifact's exposed ports.
    pub async fn reconcile(
        &self,
        networks: &mut Vec<NetworkPort>,
        exposed_ports: &[u16],
        service_id: &str,
    ) {
        let requested: Vec<i64> = if networks.is_empty() {
            exposed_ports.iter().map(|&p| i64::from(p)).collect()
        } else {
            networks.iter().map(NetworkPort::port).collect()
        };

        let allocations = self.allocate(networks, &requested, service_id).await;

        if networks.is_empty() {
            for port in requested {
                let Some(domain) = allocations.get(&port) else {
                    continue;
                };
                networks.push(self.synthesize(port, domain.clone()));
            }
            return;
        }

        for entry in networks.iter_mut() {
            if entry.domain.is_empty() {
                if let Some(domain) = allocations.get(&entry.port()) {
                    entry.domain = domain.clone();
                }
            }
            // Everything else on the entry is user intent and stays as-is.
        }
    }

    /// Ask the backend for a subdomain for every port that does not already
    /// have one. A port covered by any existing entry with a non-empty
    /// domain is skipped without an allocation call.
    async fn allocate(
        &self,
        networks: &[NetworkPort],
        requested: &[i64],
        service_id: &str,
    ) -> BTreeMap<i64, String> {
        let mut allocations = BTreeMap::new();

        for &port in requested {
            // Port 0 entries are dropped at emission; never allocate for them.
            if port == 0 || allocations.contains_key(&port) {
                continue;
            }
            let covered = networks
                .iter()
                .any(|entry| entry.port() == port && !entry.domain.is_empty());
            if covered {
                debug!(port, "Domain already set; skipping allocation");
                continue;
            }

            if let Some(subdomain) = self.backend.ask_domain(service_id).await {
                let domain = self.qualify(&subdomain);
                info!(port, domain = %domain, "Allocated domain");
                allocations.insert(port, domain);
            }
        }

        allocations
    }

    /// Append the cluster suffix unless it is already present.
    fn qualify(&self, subdomain: &str) -> String {
        if self.cluster_domain.is_empty()
            || subdomain.ends_with(&self.cluster_domain)
        {
            subdomain.to_string()
        } else {
            format!("{}.{}", subdomain, self.cluster_domain)
        }
    }

    fn synthesize(&self, port: i64, domain: String) -> NetworkPort {
        let port_type = infer_port_type(port);
        NetworkPort {
            port_number: FlexInt(port),
            port_type: port_type.as_str().to_string(),
            public: true,
            domain,
            custom_domain: String::new(),
            has_health_check: String::new(),
            health_check: HealthCheck::synthesized(port_type, port),
        }
    }

    /// Forward the final networks to the backend so the UI reflects actual
    /// ports and domains. Best-effort.
    pub async fn sync_service(&self, service_id: &str, networks: &[NetworkPort]) {
        self.backend
            .update_service(UpdateServiceRequest {
                service_id: service_id.to_string(),
                networks: networks.to_vec(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::backend::testing::RecordingPlane;
    use std::sync::Arc;

    fn reconciler(plane: Arc<RecordingPlane>, cluster: &str) -> Reconciler {
        Reconciler::new(BackendReporter::new(Some(plane)), cluster)
    }

    fn entry(port: i64, domain: &str) -> NetworkPort {
        NetworkPort {
            port_number: FlexInt(port),
            domain: domain.to_string(),
            ..NetworkPort::default()
        }
    }

    #[tokio::test]
    async fn test_user_domains_are_never_overwritten() {
        let plane = Arc::new(RecordingPlane::allocating(&["allocated-1", "allocated-2"]));
        let r = reconciler(plane.clone(), "");

        let mut networks = vec![entry(8080, "admin-api"), entry(9090, "admin-admin")];
        r.reconcile(&mut networks, &[], "svc-1").await;

        assert_eq!(plane.asked(), 0);
        assert_eq!(networks[0].domain, "admin-api");
        assert_eq!(networks[1].domain, "admin-admin");
    }

    #[tokio::test]
    async fn test_mixed_reconciliation_allocates_only_the_gap() {
        let plane = Arc::new(RecordingPlane::allocating(&["alloc-8443"]));
        let r = reconciler(plane.clone(), "");

        let mut networks = vec![
            entry(8080, "api"),
            entry(8443, ""),
            entry(9090, "metrics"),
        ];
        r.reconcile(&mut networks, &[], "svc-1").await;

        assert_eq!(plane.asked(), 1);
        assert_eq!(networks[0].domain, "api");
        assert_eq!(networks[1].domain, "alloc-8443");
        assert_eq!(networks[2].domain, "metrics");
    }

    #[tokio::test]
    async fn test_zero_config_synthesis() {
        let plane = Arc::new(RecordingPlane::allocating(&["web-1", "db-1"]));
        let r = reconciler(plane.clone(), "apps.cloudstation.io");

        let mut networks = Vec::new();
        r.reconcile(&mut networks, &[8080, 5432], "svc-1").await;

        assert_eq!(networks.len(), 2);

        let web = &networks[0];
        assert_eq!(web.port(), 8080);
        assert_eq!(web.port_type, "http");
        assert!(web.public);
        assert_eq!(web.domain, "web-1.apps.cloudstation.io");
        assert_eq!(web.health_check.check_type, "http");
        assert_eq!(web.health_check.path, "/");
        assert_eq!(web.health_check.interval, "30s");
        assert_eq!(web.health_check.timeout, "30s");

        let db = &networks[1];
        assert_eq!(db.port_type, "tcp");
        assert_eq!(db.health_check.check_type, "tcp");
    }

    #[tokio::test]
    async fn test_cluster_suffix_not_doubled() {
        let plane = Arc::new(RecordingPlane::allocating(&["web.apps.cloudstation.io"]));
        let r = reconciler(plane.clone(), "apps.cloudstation.io");

        let mut networks = vec![entry(80, "")];
        r.reconcile(&mut networks, &[], "svc-1").await;
        assert_eq!(networks[0].domain, "web.apps.cloudstation.io");
    }

    #[tokio::test]
    async fn test_allocation_failure_leaves_domain_empty() {
        let plane = Arc::new(RecordingPlane {
            fail_ask: true,
            ..Default::default()
        });
        let r = reconciler(plane.clone(), "");

        let mut networks = vec![entry(8080, "")];
        r.reconcile(&mut networks, &[], "svc-1").await;
        assert_eq!(networks[0].domain, "");
    }

    #[tokio::test]
    async fn test_user_fields_untouched_during_merge() {
        let plane = Arc::new(RecordingPlane::allocating(&["alloc-1"]));
        let r = reconciler(plane.clone(), "");

        let mut networks = vec![NetworkPort {
            port_number: FlexInt(8443),
            port_type: "grpc".to_string(),
            public: false,
            domain: String::new(),
            custom_domain: "grpc.acme.dev".to_string(),
            has_health_check: "true".to_string(),
            health_check: HealthCheck {
                check_type: "grpc".to_string(),
                path: "/grpc.health.v1.Health/Check".to_string(),
                interval: "10s".to_string(),
                timeout: "5s".to_string(),
                port: FlexInt(8443),
            },
        }];
        let before = networks[0].clone();
        r.reconcile(&mut networks, &[], "svc-1").await;

        assert_eq!(networks[0].domain, "alloc-1");
        assert_eq!(networks[0].port_type, before.port_type);
        assert_eq!(networks[0].public, before.public);
        assert_eq!(networks[0].custom_domain, before.custom_domain);
        assert_eq!(networks[0].health_check, before.health_check);
    }

    #[tokio::test]
    async fn test_service_sync_forwards_final_networks() {
        let plane = Arc::new(RecordingPlane::default());
        let r = reconciler(plane.clone(), "");

        let networks = vec![entry(8080, "api")];
        r.sync_service("svc-1", &networks).await;

        let updates = plane.service_updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].service_id, "svc-1");
        assert_eq!(updates[0].networks.len(), 1);
    }
}
