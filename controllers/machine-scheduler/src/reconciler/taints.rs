//! Taint/toleration matching

use crds::{Taint, Toleration, TolerationOperator};

/// True when `toleration` matches `taint`: same key and effect, and the value rule of the
/// operator holds (`Equal` compares values, `Exists` ignores them).
pub fn tolerates(toleration: &Toleration, taint: &Taint) -> bool {
    if toleration.key != taint.key || toleration.effect != taint.effect {
        return false;
    }
    match toleration.operator {
        TolerationOperator::Equal => toleration.value == taint.value,
        TolerationOperator::Exists => true,
    }
}

/// True when a request carrying `tolerations` may be placed on a machine carrying `taints`.
///
/// An untainted machine accepts anything. Otherwise the tolerations must match the taints
/// one for one: the number of matching (toleration, taint) pairs over the full cross product
/// equals the number of taints, and there are exactly as many tolerations as taints.
/// A request with extra, unrelated tolerations is therefore rejected by a tainted machine.
pub fn tolerated(tolerations: &[Toleration], taints: &[Taint]) -> bool {
    if taints.is_empty() {
        return true;
    }
    if tolerations.len() != taints.len() {
        return false;
    }
    let matching_pairs = tolerations
        .iter()
        .map(|toleration| taints.iter().filter(|taint| tolerates(toleration, taint)).count())
        .sum::<usize>();
    matching_pairs == taints.len()
}
