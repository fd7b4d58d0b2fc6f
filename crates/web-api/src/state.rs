use std::sync::Arc;

use application::{CapacityLedger, ConfirmationDispatcher, RequestRateGuard};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<CapacityLedger>,
    pub dispatcher: ConfirmationDispatcher,
    pub rate_guard: Arc<RequestRateGuard>,
}

impl AppState {
    pub fn new(
        ledger: Arc<CapacityLedger>,
        dispatcher: ConfirmationDispatcher,
        rate_guard: Arc<RequestRateGuard>,
    ) -> Self {
        Self {
            ledger,
            dispatcher,
            rate_guard,
        }
    }
}
