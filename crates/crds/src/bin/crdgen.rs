//! CRD manifest generator
//!
//! Prints the CustomResourceDefinition manifests as a multi-document YAML stream:
//! `cargo run -p crds --bin crdgen > config/crd/crds.yaml`

use crds::{Machine, Oob, ReservationRequest};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [Machine::crd(), ReservationRequest::crd(), Oob::crd()];
    for crd in &crds {
        println!("---");
        print!("{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
