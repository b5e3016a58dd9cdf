//! Unit tests for the certificate set

#[cfg(test)]
mod tests {
    use crate::certificates::{Certificates, KeyPair, Purpose, TLS_CRT_KEY, TLS_KEY_KEY, secret_to_key_pair};
    use crate::error::PkiError;
    use crate::generate::generate_ca;
    use cluster_store::{Deadline, MockStore};
    use crds::{Cluster, ClusterConfiguration, ClusterSpec, Etcd, ExternalEtcd, CLUSTER_NAME_LABEL};
    use k8s_openapi::ByteString;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
    use std::collections::BTreeMap;
    use std::time::Duration;

    const NS: &str = "default";

    fn cluster() -> Cluster {
        let mut cluster = Cluster::new("prod", ClusterSpec::default());
        cluster.metadata.namespace = Some(NS.to_string());
        cluster.metadata.uid = Some("cluster-uid".to_string());
        cluster
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(30))
    }

    fn stored_secret(name: &str, key_pair: &KeyPair, owners: Option<Vec<OwnerReference>>) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(NS.to_string()),
                owner_references: owners,
                ..Default::default()
            },
            data: Some(BTreeMap::from([
                (TLS_CRT_KEY.to_string(), ByteString(key_pair.cert.clone())),
                (TLS_KEY_KEY.to_string(), ByteString(key_pair.key.clone())),
            ])),
            ..Default::default()
        }
    }

    fn external_etcd_config() -> ClusterConfiguration {
        ClusterConfiguration {
            etcd: Some(Etcd {
                local: None,
                external: Some(ExternalEtcd {
                    endpoints: vec!["https://etcd-0:2379".to_string()],
                    ca_file: "/etc/etcd/ca.crt".to_string(),
                    cert_file: "/etc/etcd/apiserver-etcd-client.crt".to_string(),
                    key_file: "/etc/etcd/apiserver-etcd-client.key".to_string(),
                }),
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_lookup_or_generate_creates_every_generatable_secret() {
        let store = MockStore::new();
        let mut config = ClusterConfiguration::default();
        let mut certificates = Certificates::for_initial_control_plane(&mut config);
        assert_eq!(config.certificates_dir, "/etc/kubernetes/pki");

        certificates.lookup_or_generate(&store, &cluster(), &deadline()).await.unwrap();
        certificates.ensure_all_exist().unwrap();

        assert_eq!(store.secret_count(), 4);
        for suffix in ["ca", "etcd", "proxy", "sa"] {
            let secret = store.secret(NS, &format!("prod-{suffix}")).unwrap();
            let labels = secret.metadata.labels.unwrap();
            assert_eq!(labels[CLUSTER_NAME_LABEL], "prod");
            let owners = secret.metadata.owner_references.unwrap();
            assert_eq!(owners.len(), 1);
            assert_eq!(owners[0].kind, "Cluster");
            assert_eq!(owners[0].uid, "cluster-uid");
            let data = secret.data.unwrap();
            assert!(!data[TLS_CRT_KEY].0.is_empty());
            assert!(!data[TLS_KEY_KEY].0.is_empty());
        }
        assert_eq!(
            certificates.generated_purposes(),
            vec![Purpose::ClusterCa, Purpose::EtcdCa, Purpose::FrontProxyCa, Purpose::ServiceAccount]
        );
    }

    #[tokio::test]
    async fn test_existing_cluster_ca_wins_over_generation() {
        let store = MockStore::new();
        let existing = generate_ca().unwrap();
        store.add_secret(stored_secret("prod-ca", &existing, None));

        let mut certificates = Certificates::for_joining_control_plane();
        certificates.lookup_or_generate(&store, &cluster(), &deadline()).await.unwrap();

        let ca = certificates.get_by_purpose(Purpose::ClusterCa).unwrap();
        assert!(!ca.generated);
        assert_eq!(ca.key_pair.as_ref(), Some(&existing));
        // Three new secrets, the existing CA was not re-created
        assert_eq!(store.secret_creates(), 3);
        assert_eq!(store.secret_count(), 4);
        assert!(!certificates.generated_purposes().contains(&Purpose::ClusterCa));
    }

    #[tokio::test]
    async fn test_second_pass_regenerates_nothing() {
        let store = MockStore::new();
        let mut first = Certificates::for_joining_control_plane();
        first.lookup_or_generate(&store, &cluster(), &deadline()).await.unwrap();

        let mut second = Certificates::for_joining_control_plane();
        second.lookup_or_generate(&store, &cluster(), &deadline()).await.unwrap();

        assert!(second.generated_purposes().is_empty());
        assert_eq!(store.secret_creates(), 4);
        assert_eq!(
            first.get_by_purpose(Purpose::EtcdCa).unwrap().key_pair,
            second.get_by_purpose(Purpose::EtcdCa).unwrap().key_pair
        );
    }

    #[tokio::test]
    async fn test_competing_writer_material_replaces_local_copy() {
        let store = MockStore::new();
        let mut certificates = Certificates::for_joining_control_plane();
        certificates.lookup(&store, &cluster(), &deadline()).await.unwrap();
        certificates.generate().unwrap();

        // Another reconciliation stores its CA between our generate and save
        let winner = generate_ca().unwrap();
        store.add_secret(stored_secret("prod-ca", &winner, None));

        certificates.save_generated(&store, &cluster(), &deadline()).await.unwrap();
        let ca = certificates.get_by_purpose(Purpose::ClusterCa).unwrap();
        assert_eq!(ca.key_pair.as_ref(), Some(&winner));
        assert!(!ca.generated);
    }

    #[tokio::test]
    async fn test_failed_save_is_storage_error() {
        let store = MockStore::new();
        store.fail_secret_creates(true);
        let mut certificates = Certificates::for_joining_control_plane();
        let err = certificates
            .lookup_or_generate(&store, &cluster(), &deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, PkiError::Store(_)));
    }

    #[tokio::test]
    async fn test_lookup_reparents_secret_owned_by_config() {
        let store = MockStore::new();
        let owner = OwnerReference {
            api_version: "bootstrap.cluster.x-k8s.io/v1alpha2".to_string(),
            kind: "KubeadmConfig".to_string(),
            name: "cp-0".to_string(),
            uid: "config-uid".to_string(),
            ..Default::default()
        };
        store.add_secret(stored_secret("prod-ca", &generate_ca().unwrap(), Some(vec![owner])));

        let mut certificates = Certificates::for_joining_control_plane();
        certificates.lookup(&store, &cluster(), &deadline()).await.unwrap();
        certificates.lookup(&store, &cluster(), &deadline()).await.unwrap();

        let owners = store.secret(NS, "prod-ca").unwrap().metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "Cluster");
        assert_eq!(owners[0].name, "prod");
    }

    #[tokio::test]
    async fn test_malformed_secret_is_an_error() {
        let store = MockStore::new();
        store.add_secret(Secret {
            metadata: ObjectMeta {
                name: Some("prod-ca".to_string()),
                namespace: Some(NS.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(TLS_KEY_KEY.to_string(), ByteString(b"key".to_vec()))])),
            ..Default::default()
        });

        let mut certificates = Certificates::for_joining_control_plane();
        let err = certificates.lookup(&store, &cluster(), &deadline()).await.unwrap_err();
        assert!(matches!(err, PkiError::MalformedSecret { .. }));
    }

    #[test]
    fn test_secret_without_key_is_accepted() {
        let ca = generate_ca().unwrap();
        let mut secret = stored_secret("prod-etcd", &ca, None);
        secret.data.as_mut().unwrap().remove(TLS_KEY_KEY);
        let kp = secret_to_key_pair(&secret).unwrap();
        assert_eq!(kp.cert, ca.cert);
        assert!(kp.key.is_empty());
    }

    #[tokio::test]
    async fn test_external_etcd_material_is_required_and_not_generated() {
        let store = MockStore::new();
        let mut config = external_etcd_config();
        let mut certificates = Certificates::for_initial_control_plane(&mut config);

        let err = certificates
            .lookup_or_generate(&store, &cluster(), &deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, PkiError::MissingExternal { purpose: Purpose::EtcdCa, .. }));

        // User supplies the etcd CA (certificate only) and the client pair
        let etcd_ca = generate_ca().unwrap();
        let mut etcd_secret = stored_secret("prod-etcd", &etcd_ca, None);
        etcd_secret.data.as_mut().unwrap().remove(TLS_KEY_KEY);
        store.add_secret(etcd_secret);
        store.add_secret(stored_secret("prod-apiserver-etcd-client", &generate_ca().unwrap(), None));

        let mut certificates = Certificates::for_initial_control_plane(&mut config);
        certificates.lookup_or_generate(&store, &cluster(), &deadline()).await.unwrap();
        certificates.ensure_all_exist().unwrap();

        assert!(store.secret(NS, "prod-ca").is_some());
        assert!(!certificates.generated_purposes().contains(&Purpose::EtcdCa));
        assert!(!certificates.generated_purposes().contains(&Purpose::ApiServerEtcdClient));

        let files = certificates.as_files();
        assert!(files.iter().any(|f| f.path == "/etc/etcd/ca.crt"));
        assert!(files.iter().any(|f| f.path == "/etc/etcd/apiserver-etcd-client.key"));
        assert!(!files.iter().any(|f| f.path.ends_with("etcd/ca.key")));
    }

    #[test]
    fn test_ensure_all_exist_reports_missing_material() {
        let mut config = ClusterConfiguration::default();
        let certificates = Certificates::for_initial_control_plane(&mut config);
        assert!(matches!(
            certificates.ensure_all_exist(),
            Err(PkiError::MissingCertificate(Purpose::ClusterCa))
        ));
    }

    #[test]
    fn test_hashes_are_stable_sha256_pins() {
        let mut certificates = Certificates::for_joining_control_plane();
        certificates.generate().unwrap();

        let first = certificates.hashes(Purpose::ClusterCa).unwrap();
        let second = certificates.hashes(Purpose::ClusterCa).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        let hex = first[0].strip_prefix("sha256:").unwrap();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_hashes_cover_every_certificate_in_chain() {
        let first = generate_ca().unwrap();
        let second = generate_ca().unwrap();
        let mut chain = first.cert.clone();
        chain.extend_from_slice(&second.cert);

        let mut secret = stored_secret("prod-ca", &first, None);
        secret.data.as_mut().unwrap().insert(TLS_CRT_KEY.to_string(), ByteString(chain));
        let kp = secret_to_key_pair(&secret).unwrap();

        let mut certificates = Certificates::for_joining_control_plane();
        certificates.generate().unwrap();
        let mut ca = certificates.get_by_purpose(Purpose::ClusterCa).unwrap().clone();
        ca.key_pair = Some(kp);
        let hashes = ca.hashes().unwrap();
        assert_eq!(hashes.len(), 2);
        assert_ne!(hashes[0], hashes[1]);
    }

    #[test]
    fn test_hashes_of_missing_certificate() {
        let certificates = Certificates::for_joining_control_plane();
        assert!(matches!(
            certificates.hashes(Purpose::ClusterCa),
            Err(PkiError::MissingCertificate(Purpose::ClusterCa))
        ));
    }

    #[test]
    fn test_certificate_file_modes() {
        let mut certificates = Certificates::for_joining_control_plane();
        certificates.generate().unwrap();
        let ca = certificates.get_by_purpose(Purpose::ClusterCa).unwrap();

        let files = ca.as_files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "/etc/kubernetes/pki/ca.crt");
        assert_eq!(files[0].permissions, "0640");
        assert_eq!(files[1].path, "/etc/kubernetes/pki/ca.key");
        assert_eq!(files[1].permissions, "0600");
        assert!(files.iter().all(|f| f.owner == "root:root"));
    }

    #[test]
    fn test_as_files_order() {
        let mut config = ClusterConfiguration {
            certificates_dir: "/var/lib/pki".to_string(),
            ..Default::default()
        };
        let mut certificates = Certificates::for_initial_control_plane(&mut config);
        certificates.generate().unwrap();
        let paths: Vec<_> = certificates.as_files().into_iter().map(|f| f.path).collect();
        assert_eq!(
            paths,
            vec![
                "/var/lib/pki/ca.crt",
                "/var/lib/pki/ca.key",
                "/var/lib/pki/etcd/ca.crt",
                "/var/lib/pki/etcd/ca.key",
                "/var/lib/pki/front-proxy-ca.crt",
                "/var/lib/pki/front-proxy-ca.key",
                "/var/lib/pki/sa.pub",
                "/var/lib/pki/sa.key",
            ]
        );
    }

    #[test]
    fn test_as_secret_owner_only_when_generated() {
        let mut certificates = Certificates::for_joining_control_plane();
        certificates.generate().unwrap();
        let mut ca = certificates.get_by_purpose(Purpose::ClusterCa).unwrap().clone();

        let secret = ca.as_secret(&cluster()).unwrap();
        assert_eq!(secret.metadata.name.as_deref(), Some("prod-ca"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some(NS));
        assert!(secret.metadata.owner_references.is_some());

        ca.generated = false;
        assert!(ca.as_secret(&cluster()).unwrap().metadata.owner_references.is_none());

        ca.key_pair = None;
        assert!(ca.as_secret(&cluster()).is_none());
    }
}
