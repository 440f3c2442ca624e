use std::sync::Arc;

use crate::services::{CourseStorage, RegistryReconciler};

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<CourseStorage>,
    pub reconciler: Arc<RegistryReconciler>,
}

impl AppState {
    pub fn new(storage: Arc<CourseStorage>) -> Self {
        let reconciler = Arc::new(RegistryReconciler::new(storage.clone()));
        Self { storage, reconciler }
    }
}
