//! Order, info and dispute records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::nostr::PublicKey;
use crate::types::{Error, Result};
use crate::validation::{validate_non_empty, validate_positive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Buy,
    Sell,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Buy => "buy",
            OrderKind::Sell => "sell",
        }
    }
}

impl FromStr for OrderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "buy" => Ok(OrderKind::Buy),
            "sell" => Ok(OrderKind::Sell),
            other => Err(Error::incomplete_record(format!("unknown order kind {:?}", other))),
        }
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status string a freshly submitted order carries.
pub const STATUS_PENDING: &str = "pending";

/// Public order as published by the coordinator.
///
/// `min_amount`/`max_amount` are only set for range orders (a `fa` tag with
/// a third field).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub kind: OrderKind,
    pub status: String,
    pub fiat_code: String,
    pub fiat_amount: f64,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
    pub payment_method: String,
    pub premium: f64,
    pub created_at: u64,
    pub amount: i64,
    /// Author of the public record.
    pub counterparty_id: PublicKey,
}

/// Order body sent with `NewOrder` and echoed back by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub kind: OrderKind,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub amount: i64,
    pub fiat_code: String,
    #[serde(default)]
    pub fiat_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<f64>,
    pub payment_method: String,
    #[serde(default)]
    pub premium: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_invoice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
}

fn default_status() -> String {
    STATUS_PENDING.to_string()
}

impl NewOrder {
    /// Fixed-amount order for `fiat_amount` units of `fiat_code`.
    pub fn fixed(kind: OrderKind, fiat_code: &str, fiat_amount: f64, payment_method: &str) -> Self {
        Self {
            id: None,
            kind,
            status: default_status(),
            amount: 0,
            fiat_code: fiat_code.to_string(),
            fiat_amount,
            min_amount: None,
            max_amount: None,
            payment_method: payment_method.to_string(),
            premium: 0.0,
            buyer_invoice: None,
            created_at: None,
        }
    }

    /// Range order between `min` and `max` fiat units.
    pub fn range(kind: OrderKind, fiat_code: &str, min: f64, max: f64, payment_method: &str) -> Self {
        Self {
            min_amount: Some(min),
            max_amount: Some(max),
            ..Self::fixed(kind, fiat_code, 0.0, payment_method)
        }
    }

    pub fn with_premium(mut self, premium: f64) -> Self {
        self.premium = premium;
        self
    }

    pub fn with_amount(mut self, sats: i64) -> Self {
        self.amount = sats;
        self
    }

    pub fn is_range(&self) -> bool {
        self.min_amount.is_some() || self.max_amount.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        validate_non_empty(&self.fiat_code, "fiat_code")?;
        validate_non_empty(&self.payment_method, "payment_method")?;
        if self.amount < 0 {
            return Err(Error::validation("amount cannot be negative"));
        }
        match (self.min_amount, self.max_amount) {
            (Some(min), Some(max)) => {
                validate_positive(min, "min_amount")?;
                if min >= max {
                    return Err(Error::validation(format!(
                        "min_amount {} must be below max_amount {}",
                        min, max
                    )));
                }
            }
            (None, None) => validate_positive(self.fiat_amount, "fiat_amount")?,
            _ => {
                return Err(Error::validation(
                    "range orders need both min_amount and max_amount",
                ))
            }
        }
        Ok(())
    }
}

/// Coordinator capability record. Numeric fields absent from the event are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MostroInfo {
    pub mostro_pubkey: String,
    pub mostro_version: String,
    pub mostro_commit_id: String,
    pub max_order_amount: Option<i64>,
    pub min_order_amount: Option<i64>,
    pub expiration_hours: Option<u64>,
    pub expiration_seconds: Option<u64>,
    pub fee: Option<f64>,
    pub hold_invoice_expiration_window: Option<u64>,
    pub invoice_expiration_window: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    pub id: String,
    pub status: String,
    pub created_at: u64,
}
