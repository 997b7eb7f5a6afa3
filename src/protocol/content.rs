//! Message payload shapes and the per-action rules that constrain them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::action::Action;
use super::order::NewOrder;
use crate::types::{Error, Result};

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

/// Payload of a protocol message.
///
/// Externally tagged on the wire (`{"amount": 21}`, `{"payment_request": [..]}`);
/// any other object is carried as `Opaque`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Content {
    Order(NewOrder),
    Amount(i64),
    /// `[order, invoice, amount]`
    PaymentRequest(Option<NewOrder>, String, Option<i64>),
    RatingUser(u8),
    TextMessage(String),
    #[serde(untagged)]
    Opaque(Value),
}

impl Content {
    fn shape(&self) -> &'static str {
        match self {
            Content::Order(_) => "order",
            Content::Amount(_) => "amount",
            Content::PaymentRequest(..) => "payment_request",
            Content::RatingUser(_) => "rating_user",
            Content::TextMessage(_) => "text_message",
            Content::Opaque(_) => "opaque",
        }
    }

    fn check_values(&self) -> Result<()> {
        match self {
            Content::Amount(n) if *n <= 0 => {
                Err(Error::invalid_message(format!("amount must be positive, got {}", n)))
            }
            Content::PaymentRequest(_, invoice, _) if invoice.trim().is_empty() => {
                Err(Error::invalid_message("payment request without invoice"))
            }
            Content::RatingUser(r) if !(MIN_RATING..=MAX_RATING).contains(r) => Err(
                Error::invalid_message(format!(
                    "rating must be between {} and {}, got {}",
                    MIN_RATING, MAX_RATING, r
                )),
            ),
            _ => Ok(()),
        }
    }
}

/// Check that `content` is a shape `action` accepts.
///
/// | action               | accepted content                 |
/// |----------------------|----------------------------------|
/// | NewOrder             | order                            |
/// | TakeSell, TakeBuy    | null, amount                     |
/// | AddInvoice           | payment_request, order           |
/// | PayInvoice           | payment_request                  |
/// | RateUser             | rating_user, null                |
/// | everything else      | anything                         |
pub fn validate_for_action(action: &Action, content: Option<&Content>) -> Result<()> {
    let accepted = match (action, content) {
        (Action::NewOrder, Some(Content::Order(_))) => true,
        (Action::NewOrder, _) => false,
        (Action::TakeSell | Action::TakeBuy, None | Some(Content::Amount(_))) => true,
        (Action::TakeSell | Action::TakeBuy, _) => false,
        (Action::AddInvoice, Some(Content::PaymentRequest(..) | Content::Order(_))) => true,
        (Action::AddInvoice, _) => false,
        (Action::PayInvoice, Some(Content::PaymentRequest(..))) => true,
        (Action::PayInvoice, _) => false,
        (Action::RateUser, None | Some(Content::RatingUser(_))) => true,
        (Action::RateUser, _) => false,
        _ => true,
    };

    if !accepted {
        let shape = content.map(Content::shape).unwrap_or("null");
        return Err(Error::invalid_message(format!(
            "{} does not accept {} content",
            action, shape
        )));
    }
    content.map(Content::check_values).transpose()?;
    Ok(())
}
