pub mod reconciler;
pub mod zombie;

pub use reconciler::{ReconcileOutcome, ReconcileReport, StateReconciler};
pub use zombie::ZombieDetector;
