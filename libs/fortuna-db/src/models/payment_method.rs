use serde::{Deserialize, Serialize};

/// A bank-transfer destination the admin shows to purchasers. Inactive
/// methods are kept (transactions may reference them in spirit) but not
/// offered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: i64,
    pub name: String,
    pub details: String,
    pub is_active: bool,
}
