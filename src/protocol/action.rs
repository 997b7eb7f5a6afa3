//! Protocol action names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Action carried in every protocol message. Unknown names are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    NewOrder,
    TakeSell,
    TakeBuy,
    AddInvoice,
    Release,
    FiatSent,
    RateUser,
    Dispute,
    Cancel,
    PayInvoice,
    BuyerTookOrder,
    HoldInvoicePaymentAccepted,
    WaitingSellerToPay,
    Other(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::NewOrder => "NewOrder",
            Action::TakeSell => "TakeSell",
            Action::TakeBuy => "TakeBuy",
            Action::AddInvoice => "AddInvoice",
            Action::Release => "Release",
            Action::FiatSent => "FiatSent",
            Action::RateUser => "RateUser",
            Action::Dispute => "Dispute",
            Action::Cancel => "Cancel",
            Action::PayInvoice => "PayInvoice",
            Action::BuyerTookOrder => "BuyerTookOrder",
            Action::HoldInvoicePaymentAccepted => "HoldInvoicePaymentAccepted",
            Action::WaitingSellerToPay => "WaitingSellerToPay",
            Action::Other(name) => name,
        }
    }
}

impl From<String> for Action {
    fn from(name: String) -> Self {
        match name.as_str() {
            "NewOrder" => Action::NewOrder,
            "TakeSell" => Action::TakeSell,
            "TakeBuy" => Action::TakeBuy,
            "AddInvoice" => Action::AddInvoice,
            "Release" => Action::Release,
            "FiatSent" => Action::FiatSent,
            "RateUser" => Action::RateUser,
            "Dispute" => Action::Dispute,
            "Cancel" => Action::Cancel,
            "PayInvoice" => Action::PayInvoice,
            "BuyerTookOrder" => Action::BuyerTookOrder,
            "HoldInvoicePaymentAccepted" => Action::HoldInvoicePaymentAccepted,
            "WaitingSellerToPay" => Action::WaitingSellerToPay,
            _ => Action::Other(name),
        }
    }
}

impl From<&str> for Action {
    fn from(name: &str) -> Self {
        Action::from(name.to_string())
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        match action {
            Action::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
