//! Application state.

use std::sync::Arc;

use enroll_core::OfferingKind;
use enroll_store::Store;

use crate::config::ServiceConfig;
use crate::services::{OfferingService, PaymentService};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Course flows.
    pub courses: OfferingService,

    /// Test flows.
    pub tests: OfferingService,

    /// Payment-only operations.
    pub payments: PaymentService,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        Self {
            courses: OfferingService::new(Arc::clone(&store), OfferingKind::Course),
            tests: OfferingService::new(Arc::clone(&store), OfferingKind::Test),
            payments: PaymentService::new(Arc::clone(&store)),
            store,
            config,
        }
    }

    /// The offering service for `kind`.
    #[must_use]
    pub const fn offerings(&self, kind: OfferingKind) -> &OfferingService {
        match kind {
            OfferingKind::Course => &self.courses,
            OfferingKind::Test => &self.tests,
        }
    }
}
