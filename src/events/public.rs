//! Public state decoding: tag-encoded coordinator events → typed records.
//!
//! Classification follows the `z` tag:
//!   order   → [`Order`]      (d, k, s, pm, premium, f required)
//!   info    → [`MostroInfo`] (all fields optional)
//!   dispute → [`Dispute`]    (d, s required)
//!   (other) → ignored
//!
//! One numeric policy for every record: an absent numeric tag is `None` (or
//! zero where the record has no optional), a present tag that does not parse
//! is `IncompleteRecord`.

use std::str::FromStr;

use crate::nostr::{Event, Tags};
use crate::protocol::{Dispute, MostroInfo, Order, OrderKind};
use crate::types::{Error, Result};

/// Decoded public record.
#[derive(Debug, Clone, PartialEq)]
pub enum PublicRecord {
    Order(Order),
    Info(MostroInfo),
    Dispute(Dispute),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Order,
    Info,
    Dispute,
}

/// Read the discriminant `z` tag. `None` for anything unrecognised.
pub fn classify(event: &Event) -> Option<RecordKind> {
    match event.tags.first_value("z") {
        Some("order") => Some(RecordKind::Order),
        Some("info") => Some(RecordKind::Info),
        Some("dispute") => Some(RecordKind::Dispute),
        _ => None,
    }
}

/// Classify and decode in one step. `Ok(None)` for unclassified events.
pub fn decode(event: &Event) -> Result<Option<PublicRecord>> {
    let record = match classify(event) {
        Some(RecordKind::Order) => PublicRecord::Order(decode_order(event)?),
        Some(RecordKind::Info) => PublicRecord::Info(decode_info(event)?),
        Some(RecordKind::Dispute) => PublicRecord::Dispute(decode_dispute(event)?),
        None => return Ok(None),
    };
    Ok(Some(record))
}

pub fn decode_order(event: &Event) -> Result<Order> {
    let tags = &event.tags;
    let id = required(tags, "d")?;
    let kind = OrderKind::from_str(required(tags, "k")?)?;
    let status = required(tags, "s")?;
    let payment_method = required(tags, "pm")?;
    let premium: f64 = parse(required(tags, "premium")?, "premium")?;
    let fiat_code = required(tags, "f")?;

    let amount: i64 = optional(tags, "amt", 1)?.unwrap_or(0);
    let fiat_amount: f64 = optional(tags, "fa", 1)?.unwrap_or(0.0);

    // ["fa", a] is a fixed amount; ["fa", a, b] is the range a..b
    let max_amount: Option<f64> = optional(tags, "fa", 2)?;
    let min_amount = if max_amount.is_some() {
        Some(fiat_amount)
    } else {
        None
    };

    Ok(Order {
        id: id.to_string(),
        kind,
        status: status.to_string(),
        fiat_code: fiat_code.to_string(),
        fiat_amount,
        min_amount,
        max_amount,
        payment_method: payment_method.to_string(),
        premium,
        created_at: event.created_at,
        amount,
        counterparty_id: event.pubkey,
    })
}

pub fn decode_info(event: &Event) -> Result<MostroInfo> {
    let tags = &event.tags;
    let text = |name: &str| tags.first_value(name).unwrap_or_default().to_string();

    Ok(MostroInfo {
        mostro_pubkey: text("mostro_pubkey"),
        mostro_version: text("mostro_version"),
        mostro_commit_id: text("mostro_commit_id"),
        max_order_amount: optional(tags, "max_order_amount", 1)?,
        min_order_amount: optional(tags, "min_order_amount", 1)?,
        expiration_hours: optional(tags, "expiration_hours", 1)?,
        expiration_seconds: optional(tags, "expiration_seconds", 1)?,
        fee: optional(tags, "fee", 1)?,
        hold_invoice_expiration_window: optional(tags, "hold_invoice_expiration_window", 1)?,
        invoice_expiration_window: optional(tags, "invoice_expiration_window", 1)?,
    })
}

pub fn decode_dispute(event: &Event) -> Result<Dispute> {
    Ok(Dispute {
        id: required(&event.tags, "d")?.to_string(),
        status: required(&event.tags, "s")?.to_string(),
        created_at: event.created_at,
    })
}

fn required<'a>(tags: &'a Tags, name: &str) -> Result<&'a str> {
    match tags.first_value(name) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::incomplete_record(format!("missing tag {:?}", name))),
    }
}

fn optional<T: FromStr>(tags: &Tags, name: &str, index: usize) -> Result<Option<T>> {
    match tags.value_at(name, index) {
        Some(raw) if !raw.is_empty() => parse(raw, name).map(Some),
        _ => Ok(None),
    }
}

fn parse<T: FromStr>(raw: &str, name: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::incomplete_record(format!("tag {:?} is not numeric: {:?}", name, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nostr::{kind, Keys, UnsignedEvent};
    use pretty_assertions::assert_eq;

    fn public_event(keys: &Keys, tags: &[&[&str]]) -> Event {
        let tags: Vec<Vec<String>> = tags
            .iter()
            .map(|t| t.iter().map(|s| s.to_string()).collect())
            .collect();
        Event::sign(
            UnsignedEvent::new(
                keys.public_key(),
                1_700_000_000,
                kind::ORDER_STATE,
                Tags::from(tags),
                String::new(),
            ),
            keys,
        )
        .unwrap()
    }

    const ORDER_TAGS: &[&[&str]] = &[
        &["d", "abc"],
        &["k", "sell"],
        &["s", "pending"],
        &["pm", "cashapp"],
        &["premium", "5"],
        &["f", "USD"],
    ];

    #[test]
    fn test_decode_minimal_order() {
        let mostro = Keys::generate();
        let order = decode_order(&public_event(&mostro, ORDER_TAGS)).unwrap();

        assert_eq!(
            order,
            Order {
                id: "abc".to_string(),
                kind: OrderKind::Sell,
                status: "pending".to_string(),
                fiat_code: "USD".to_string(),
                fiat_amount: 0.0,
                min_amount: None,
                max_amount: None,
                payment_method: "cashapp".to_string(),
                premium: 5.0,
                created_at: 1_700_000_000,
                amount: 0,
                counterparty_id: mostro.public_key(),
            }
        );
    }

    #[test]
    fn test_missing_fiat_code_is_incomplete() {
        let mostro = Keys::generate();
        let without_f: Vec<&[&str]> = ORDER_TAGS.iter().copied().filter(|t| t[0] != "f").collect();
        let err = decode_order(&public_event(&mostro, &without_f)).unwrap_err();
        assert!(matches!(err, Error::IncompleteRecord(_)));
    }

    #[test]
    fn test_every_required_tag_is_checked() {
        let mostro = Keys::generate();
        for skip in ["d", "k", "s", "pm", "premium", "f"] {
            let tags: Vec<&[&str]> = ORDER_TAGS.iter().copied().filter(|t| t[0] != skip).collect();
            assert!(
                decode_order(&public_event(&mostro, &tags)).is_err(),
                "decoded without {}",
                skip
            );
        }
    }

    #[test]
    fn test_range_order_maps_fa_fields_literally() {
        let mostro = Keys::generate();
        let mut tags = ORDER_TAGS.to_vec();
        tags.push(&["fa", "10", "100"]);
        tags.push(&["amt", "0"]);
        let order = decode_order(&public_event(&mostro, &tags)).unwrap();

        assert_eq!(order.fiat_amount, 10.0);
        assert_eq!(order.min_amount, Some(10.0));
        assert_eq!(order.max_amount, Some(100.0));
    }

    #[test]
    fn test_fixed_order_amounts() {
        let mostro = Keys::generate();
        let mut tags = ORDER_TAGS.to_vec();
        tags.push(&["fa", "50"]);
        tags.push(&["amt", "12000"]);
        let order = decode_order(&public_event(&mostro, &tags)).unwrap();

        assert_eq!(order.fiat_amount, 50.0);
        assert_eq!(order.amount, 12_000);
        assert_eq!(order.min_amount, None);
    }

    #[test]
    fn test_garbage_numeric_is_incomplete() {
        let mostro = Keys::generate();
        let mut tags = ORDER_TAGS.to_vec();
        tags.push(&["amt", "lots"]);
        assert!(matches!(
            decode_order(&public_event(&mostro, &tags)),
            Err(Error::IncompleteRecord(_))
        ));
    }

    #[test]
    fn test_unknown_kind_is_incomplete() {
        let mostro = Keys::generate();
        let tags: Vec<&[&str]> = ORDER_TAGS
            .iter()
            .copied()
            .map(|t| if t[0] == "k" { &["k", "swap"][..] } else { t })
            .collect();
        assert!(decode_order(&public_event(&mostro, &tags)).is_err());
    }

    #[test]
    fn test_decode_info_with_missing_numerics() {
        let mostro = Keys::generate();
        let event = public_event(
            &mostro,
            &[
                &["z", "info"],
                &["mostro_version", "0.12.8"],
                &["fee", "0.006"],
                &["max_order_amount", "1000000"],
                &["expiration_hours", "24"],
            ],
        );
        let info = decode_info(&event).unwrap();

        assert_eq!(info.mostro_version, "0.12.8");
        assert_eq!(info.fee, Some(0.006));
        assert_eq!(info.max_order_amount, Some(1_000_000));
        assert_eq!(info.expiration_hours, Some(24));
        assert_eq!(info.min_order_amount, None);
        assert_eq!(info.mostro_commit_id, "");
    }

    #[test]
    fn test_info_garbage_numeric_is_incomplete() {
        let mostro = Keys::generate();
        let event = public_event(&mostro, &[&["z", "info"], &["fee", "NaN-ish"]]);
        assert!(matches!(decode_info(&event), Err(Error::IncompleteRecord(_))));
    }

    #[test]
    fn test_classify_and_decode() {
        let mostro = Keys::generate();
        let mut order_tags = ORDER_TAGS.to_vec();
        order_tags.push(&["z", "order"]);

        assert_eq!(classify(&public_event(&mostro, &order_tags)), Some(RecordKind::Order));
        assert!(matches!(
            decode(&public_event(&mostro, &order_tags)).unwrap(),
            Some(PublicRecord::Order(_))
        ));
        assert_eq!(classify(&public_event(&mostro, &[&["z", "rating"]])), None);
        assert!(decode(&public_event(&mostro, &[])).unwrap().is_none());
    }

    #[test]
    fn test_decode_dispute() {
        let mostro = Keys::generate();
        let event = public_event(&mostro, &[&["z", "dispute"], &["d", "dsp-1"], &["s", "initiated"]]);
        match decode(&event).unwrap() {
            Some(PublicRecord::Dispute(d)) => {
                assert_eq!(d.id, "dsp-1");
                assert_eq!(d.status, "initiated");
                assert_eq!(d.created_at, 1_700_000_000);
            }
            other => panic!("expected dispute, got {:?}", other),
        }
    }
}
