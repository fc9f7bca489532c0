pub mod ledger_service;
pub mod payment_service;
pub mod wheel_service;
