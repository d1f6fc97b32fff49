use serde::{Deserialize, Serialize};

/// Where a business wants its settled funds sent. Owned by business
/// management; this crate only reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutDestination {
    MpesaPhone {
        phone: String,
    },
    MpesaTill {
        till_number: String,
    },
    MpesaPaybill {
        paybill_number: String,
        account_number: String,
    },
    Bank {
        bank_code: String,
        account_number: String,
        account_name: String,
    },
}

impl PayoutDestination {
    pub fn method(&self) -> &'static str {
        match self {
            PayoutDestination::MpesaPhone { .. } => "MPESA_PHONE",
            PayoutDestination::MpesaTill { .. } => "MPESA_TILL",
            PayoutDestination::MpesaPaybill { .. } => "MPESA_PAYBILL",
            PayoutDestination::Bank { .. } => "BANK",
        }
    }

    /// Builds a destination from the flat settings row, rejecting rows
    /// missing the fields their method requires.
    pub fn from_parts(
        method: &str,
        phone: Option<String>,
        till_number: Option<String>,
        paybill_number: Option<String>,
        account_number: Option<String>,
        bank_code: Option<String>,
        account_name: Option<String>,
    ) -> Option<Self> {
        let present = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        match method {
            "MPESA_PHONE" => Some(PayoutDestination::MpesaPhone {
                phone: present(phone)?,
            }),
            "MPESA_TILL" => Some(PayoutDestination::MpesaTill {
                till_number: present(till_number)?,
            }),
            "MPESA_PAYBILL" => Some(PayoutDestination::MpesaPaybill {
                paybill_number: present(paybill_number)?,
                account_number: present(account_number)?,
            }),
            "BANK" => Some(PayoutDestination::Bank {
                bank_code: present(bank_code)?,
                account_number: present(account_number)?,
                account_name: present(account_name)?,
            }),
            _ => None,
        }
    }
}
