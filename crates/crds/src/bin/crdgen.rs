//! Prints the KubeadmConfig CustomResourceDefinition as YAML
//!
//! `cargo run -p crds --bin crdgen > config/crd/kubeadmconfig.yaml`

use crds::KubeadmConfig;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&KubeadmConfig::crd())?);
    Ok(())
}
