//! Bootstrap data rendering
//!
//! A node boots from a cloud-config document that writes its certificates
//! and kubeadm configuration to disk and then runs `kubeadm init` or
//! `kubeadm join`. The three node roles share [`BaseUserData`] and differ in
//! the kubeadm file and command.

use crds::{File, KubeadmConfigSpec, Ntp, User};
use serde::Serialize;

use crate::error::ControllerError;

/// Path of the `kubeadm init` configuration on the node
pub const INIT_CONFIG_PATH: &str = "/tmp/kubeadm.yaml";

/// Path of the `kubeadm join` configuration on a control-plane node
pub const CONTROL_PLANE_JOIN_CONFIG_PATH: &str = "/tmp/kubeadm-controlplane-join-config.yaml";

/// Path of the `kubeadm join` configuration on a worker node
pub const NODE_JOIN_CONFIG_PATH: &str = "/tmp/kubeadm-node.yaml";

const CLOUD_CONFIG_HEADER: &str = "#cloud-config\n";

/// User-supplied node customisation shared by every role
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaseUserData {
    pub additional_files: Vec<File>,
    pub ntp: Option<Ntp>,
    pub pre_commands: Vec<String>,
    pub post_commands: Vec<String>,
    pub users: Vec<User>,
}

impl BaseUserData {
    pub fn from_spec(spec: &KubeadmConfigSpec) -> Self {
        Self {
            additional_files: spec.files.clone(),
            ntp: spec.ntp.clone(),
            pre_commands: spec.pre_kubeadm_commands.clone(),
            post_commands: spec.post_kubeadm_commands.clone(),
            users: spec.users.clone(),
        }
    }
}

/// Input for the node that runs `kubeadm init`
#[derive(Debug, Clone)]
pub struct ControlPlaneInput {
    pub base: BaseUserData,
    pub init_configuration: String,
    pub cluster_configuration: String,
    pub certificates: Vec<File>,
}

/// Input for a control-plane node joining an initialized cluster
#[derive(Debug, Clone)]
pub struct ControlPlaneJoinInput {
    pub base: BaseUserData,
    pub join_configuration: String,
    pub certificates: Vec<File>,
}

/// Input for a worker node
#[derive(Debug, Clone)]
pub struct NodeInput {
    pub base: BaseUserData,
    pub join_configuration: String,
}

/// Renders bootstrap data for each node role
pub trait UserDataRenderer: Send + Sync {
    fn init_control_plane(&self, input: &ControlPlaneInput) -> Result<String, ControllerError>;
    fn join_control_plane(&self, input: &ControlPlaneJoinInput) -> Result<String, ControllerError>;
    fn node(&self, input: &NodeInput) -> Result<String, ControllerError>;
}

/// Renders cloud-init `#cloud-config` documents
#[derive(Debug, Clone, Copy, Default)]
pub struct CloudConfigRenderer;

#[derive(Debug, Serialize)]
struct CloudConfig<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    ntp: Option<&'a Ntp>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    users: Vec<CloudUser<'a>>,
    write_files: Vec<WriteFile<'a>>,
    runcmd: Vec<String>,
}

#[derive(Debug, Serialize)]
struct WriteFile<'a> {
    path: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    owner: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    permissions: &'a str,
    content: &'a str,
}

impl<'a> From<&'a File> for WriteFile<'a> {
    fn from(file: &'a File) -> Self {
        Self {
            path: &file.path,
            owner: &file.owner,
            permissions: &file.permissions,
            content: &file.content,
        }
    }
}

#[derive(Debug, Serialize)]
struct CloudUser<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    groups: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    homedir: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    shell: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    passwd: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lock_passwd: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sudo: Option<&'a str>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    ssh_authorized_keys: &'a [String],
}

impl<'a> From<&'a User> for CloudUser<'a> {
    fn from(user: &'a User) -> Self {
        Self {
            name: &user.name,
            groups: user.groups.as_deref(),
            homedir: user.home_dir.as_deref(),
            shell: user.shell.as_deref(),
            passwd: user.passwd.as_deref(),
            lock_passwd: user.lock_password,
            sudo: user.sudo.as_deref(),
            ssh_authorized_keys: &user.ssh_authorized_keys,
        }
    }
}

/// Kubeadm configuration file written alongside the user's files
fn kubeadm_file(path: &str, content: String) -> File {
    File {
        path: path.to_string(),
        owner: "root:root".to_string(),
        permissions: "0640".to_string(),
        content,
    }
}

impl CloudConfigRenderer {
    fn render(
        &self,
        base: &BaseUserData,
        certificates: &[File],
        kubeadm: &File,
        command: String,
    ) -> Result<String, ControllerError> {
        let write_files = certificates
            .iter()
            .chain(&base.additional_files)
            .chain(std::iter::once(kubeadm))
            .map(WriteFile::from)
            .collect();

        let runcmd = base
            .pre_commands
            .iter()
            .cloned()
            .chain(std::iter::once(command))
            .chain(base.post_commands.iter().cloned())
            .collect();

        let document = CloudConfig {
            ntp: base.ntp.as_ref(),
            users: base.users.iter().map(CloudUser::from).collect(),
            write_files,
            runcmd,
        };
        let body = serde_yaml::to_string(&document).map_err(|e| ControllerError::Render(e.to_string()))?;
        Ok(format!("{CLOUD_CONFIG_HEADER}{body}"))
    }
}

impl UserDataRenderer for CloudConfigRenderer {
    fn init_control_plane(&self, input: &ControlPlaneInput) -> Result<String, ControllerError> {
        let content = format!("{}---\n{}", input.cluster_configuration, input.init_configuration);
        let kubeadm = kubeadm_file(INIT_CONFIG_PATH, content);
        self.render(
            &input.base,
            &input.certificates,
            &kubeadm,
            format!("kubeadm init --config {INIT_CONFIG_PATH}"),
        )
    }

    fn join_control_plane(&self, input: &ControlPlaneJoinInput) -> Result<String, ControllerError> {
        let kubeadm = kubeadm_file(CONTROL_PLANE_JOIN_CONFIG_PATH, input.join_configuration.clone());
        self.render(
            &input.base,
            &input.certificates,
            &kubeadm,
            format!("kubeadm join --config {CONTROL_PLANE_JOIN_CONFIG_PATH}"),
        )
    }

    fn node(&self, input: &NodeInput) -> Result<String, ControllerError> {
        let kubeadm = kubeadm_file(NODE_JOIN_CONFIG_PATH, input.join_configuration.clone());
        self.render(
            &input.base,
            &[],
            &kubeadm,
            format!("kubeadm join --config {NODE_JOIN_CONFIG_PATH}"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(rendered: &str) -> serde_yaml::Value {
        assert!(rendered.starts_with("#cloud-config\n"));
        serde_yaml::from_str(rendered).unwrap()
    }

    fn base() -> BaseUserData {
        BaseUserData {
            additional_files: vec![File {
                path: "/etc/motd".to_string(),
                owner: String::new(),
                permissions: String::new(),
                content: "hello".to_string(),
            }],
            ntp: Some(Ntp {
                servers: vec!["time.example.com".to_string()],
                enabled: Some(true),
            }),
            pre_commands: vec!["swapoff -a".to_string()],
            post_commands: vec!["echo done".to_string()],
            users: vec![User {
                name: "ops".to_string(),
                lock_password: Some(false),
                ssh_authorized_keys: vec!["ssh-ed25519 AAAA ops".to_string()],
                ..Default::default()
            }],
        }
    }

    fn cert_file() -> File {
        File {
            path: "/etc/kubernetes/pki/ca.crt".to_string(),
            owner: "root:root".to_string(),
            permissions: "0640".to_string(),
            content: "-----BEGIN CERTIFICATE-----\n".to_string(),
        }
    }

    #[test]
    fn test_init_control_plane() {
        let rendered = CloudConfigRenderer
            .init_control_plane(&ControlPlaneInput {
                base: base(),
                init_configuration: "kind: InitConfiguration\n".to_string(),
                cluster_configuration: "kind: ClusterConfiguration\n".to_string(),
                certificates: vec![cert_file()],
            })
            .unwrap();
        let doc = parse(&rendered);

        let files = doc["write_files"].as_sequence().unwrap();
        let paths: Vec<_> = files.iter().map(|f| f["path"].as_str().unwrap()).collect();
        assert_eq!(paths, vec!["/etc/kubernetes/pki/ca.crt", "/etc/motd", INIT_CONFIG_PATH]);
        assert_eq!(files[0]["permissions"].as_str(), Some("0640"));
        assert_eq!(
            files[2]["content"].as_str(),
            Some("kind: ClusterConfiguration\n---\nkind: InitConfiguration\n")
        );

        let runcmd: Vec<_> = doc["runcmd"]
            .as_sequence()
            .unwrap()
            .iter()
            .map(|c| c.as_str().unwrap())
            .collect();
        assert_eq!(runcmd, vec!["swapoff -a", "kubeadm init --config /tmp/kubeadm.yaml", "echo done"]);

        assert_eq!(doc["ntp"]["servers"][0].as_str(), Some("time.example.com"));
        assert_eq!(doc["users"][0]["name"].as_str(), Some("ops"));
        assert_eq!(doc["users"][0]["lock_passwd"].as_bool(), Some(false));
    }

    #[test]
    fn test_join_control_plane_writes_certificates() {
        let rendered = CloudConfigRenderer
            .join_control_plane(&ControlPlaneJoinInput {
                base: BaseUserData::default(),
                join_configuration: "kind: JoinConfiguration\n".to_string(),
                certificates: vec![cert_file()],
            })
            .unwrap();
        let doc = parse(&rendered);
        let files = doc["write_files"].as_sequence().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[1]["path"].as_str(), Some(CONTROL_PLANE_JOIN_CONFIG_PATH));
        assert_eq!(
            doc["runcmd"][0].as_str(),
            Some("kubeadm join --config /tmp/kubeadm-controlplane-join-config.yaml")
        );
        assert!(doc.get("users").is_none());
        assert!(doc.get("ntp").is_none());
    }

    #[test]
    fn test_node_has_only_join_configuration() {
        let rendered = CloudConfigRenderer
            .node(&NodeInput {
                base: BaseUserData::default(),
                join_configuration: "kind: JoinConfiguration\n".to_string(),
            })
            .unwrap();
        let doc = parse(&rendered);
        let files = doc["write_files"].as_sequence().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0]["path"].as_str(), Some(NODE_JOIN_CONFIG_PATH));
        assert_eq!(doc["runcmd"][0].as_str(), Some("kubeadm join --config /tmp/kubeadm-node.yaml"));
    }

    #[test]
    fn test_base_user_data_from_spec() {
        let spec = KubeadmConfigSpec {
            pre_kubeadm_commands: vec!["a".to_string()],
            post_kubeadm_commands: vec!["b".to_string()],
            ..Default::default()
        };
        let base = BaseUserData::from_spec(&spec);
        assert_eq!(base.pre_commands, vec!["a"]);
        assert_eq!(base.post_commands, vec!["b"]);
        assert!(base.additional_files.is_empty());
    }
}
