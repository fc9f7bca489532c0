use crate::services::ledger_service::LedgerService;
use crate::services::payment_service::PaymentService;
use crate::services::wheel_service::WheelService;

#[derive(Clone)]
pub struct AppState {
    pub ledger: LedgerService,
    pub payments: PaymentService,
    pub wheel: WheelService,
}
