pub mod reconciler;
pub mod scheduler;
pub mod storage;

pub use reconciler::{ReconcileStats, RegistryReconciler};
pub use scheduler::ReconcileScheduler;
pub use storage::{CourseStorage, MetaFailure, ReadView, SaveTier};
