//! Cluster-level defaults for the kubeadm ClusterConfiguration
//!
//! User-provided values always win; only empty fields are filled from the
//! Cluster and Machine.

use crds::{Cluster, ClusterConfiguration, Machine};
use kube::ResourceExt;
use tracing::info;

/// Fill empty ClusterConfiguration fields from the Cluster and Machine
pub fn with_cluster_defaults(
    cluster: &Cluster,
    machine: &Machine,
    mut config: ClusterConfiguration,
) -> ClusterConfiguration {
    let cluster_name = cluster.name_any();

    if config.control_plane_endpoint.is_empty() {
        if let Some(endpoint) = cluster.first_api_endpoint() {
            info!(cluster = %cluster_name, control_plane_endpoint = %endpoint, "Defaulting ClusterConfiguration");
            config.control_plane_endpoint = endpoint;
        }
    }

    if config.cluster_name.is_empty() {
        info!(cluster = %cluster_name, "Defaulting ClusterConfiguration cluster name");
        config.cluster_name = cluster_name.clone();
    }

    if let Some(network) = &cluster.spec.cluster_network {
        let networking = &mut config.networking;
        if networking.dns_domain.is_empty() && !network.service_domain.is_empty() {
            info!(cluster = %cluster_name, dns_domain = %network.service_domain, "Defaulting ClusterConfiguration");
            networking.dns_domain = network.service_domain.clone();
        }
        if let Some(services) = network.services.as_ref().filter(|s| !s.cidr_blocks.is_empty()) {
            if networking.service_subnet.is_empty() {
                networking.service_subnet = services.cidr_blocks.join(",");
                info!(cluster = %cluster_name, service_subnet = %networking.service_subnet, "Defaulting ClusterConfiguration");
            }
        }
        if let Some(pods) = network.pods.as_ref().filter(|p| !p.cidr_blocks.is_empty()) {
            if networking.pod_subnet.is_empty() {
                networking.pod_subnet = pods.cidr_blocks.join(",");
                info!(cluster = %cluster_name, pod_subnet = %networking.pod_subnet, "Defaulting ClusterConfiguration");
            }
        }
    }

    if config.kubernetes_version.is_empty() {
        if let Some(version) = &machine.spec.version {
            info!(cluster = %cluster_name, kubernetes_version = %version, "Defaulting ClusterConfiguration");
            config.kubernetes_version = version.clone();
        }
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{ApiEndpoint, ClusterNetwork, ClusterSpec, ClusterStatus, MachineSpec, NetworkRanges, Networking};

    fn cluster() -> Cluster {
        let mut cluster = Cluster::new(
            "prod",
            ClusterSpec {
                cluster_network: Some(ClusterNetwork {
                    api_server_port: None,
                    services: Some(NetworkRanges { cidr_blocks: vec!["10.96.0.0/12".to_string()] }),
                    pods: Some(NetworkRanges { cidr_blocks: vec!["192.168.0.0/16".to_string()] }),
                    service_domain: "cluster.local".to_string(),
                }),
                infrastructure_ref: None,
            },
        );
        cluster.status = Some(ClusterStatus {
            api_endpoints: vec![
                ApiEndpoint { host: "10.0.0.1".to_string(), port: 6443 },
                ApiEndpoint { host: "10.0.0.2".to_string(), port: 6443 },
            ],
            infrastructure_ready: true,
            ..Default::default()
        });
        cluster
    }

    fn machine(version: Option<&str>) -> Machine {
        Machine::new(
            "cp-0",
            MachineSpec {
                version: version.map(str::to_string),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_fills_empty_fields() {
        let config = with_cluster_defaults(&cluster(), &machine(Some("v1.30.2")), ClusterConfiguration::default());
        assert_eq!(config.control_plane_endpoint, "10.0.0.1:6443");
        assert_eq!(config.cluster_name, "prod");
        assert_eq!(config.networking.dns_domain, "cluster.local");
        assert_eq!(config.networking.service_subnet, "10.96.0.0/12");
        assert_eq!(config.networking.pod_subnet, "192.168.0.0/16");
        assert_eq!(config.kubernetes_version, "v1.30.2");
    }

    #[test]
    fn test_user_values_win() {
        let user = ClusterConfiguration {
            control_plane_endpoint: "lb.example.com:6443".to_string(),
            cluster_name: "custom".to_string(),
            kubernetes_version: "v1.29.0".to_string(),
            networking: Networking {
                service_subnet: "10.200.0.0/16".to_string(),
                pod_subnet: "10.244.0.0/16".to_string(),
                dns_domain: "corp.local".to_string(),
            },
            ..Default::default()
        };
        let config = with_cluster_defaults(&cluster(), &machine(Some("v1.30.2")), user.clone());
        assert_eq!(config, user);
    }

    #[test]
    fn test_bare_cluster_only_sets_name() {
        let bare = Cluster::new("bare", ClusterSpec::default());
        let config = with_cluster_defaults(&bare, &machine(None), ClusterConfiguration::default());
        assert_eq!(
            config,
            ClusterConfiguration {
                cluster_name: "bare".to_string(),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_multiple_cidr_blocks_are_comma_separated() {
        let mut cluster = cluster();
        if let Some(network) = cluster.spec.cluster_network.as_mut() {
            network.pods = Some(NetworkRanges {
                cidr_blocks: vec!["10.1.0.0/16".to_string(), "10.2.0.0/16".to_string()],
            });
        }
        let config = with_cluster_defaults(&cluster, &machine(None), ClusterConfiguration::default());
        assert_eq!(config.networking.pod_subnet, "10.1.0.0/16,10.2.0.0/16");
    }
}
