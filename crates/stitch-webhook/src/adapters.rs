//! Source adapters: per-source entity extraction and event-type rules.
//!
//! Every adapter implements the same small capability set; a registry
//! selects one by [`WebhookSource`]. Partial extraction falls back to the
//! generic JSON-path mapping on `entity_mapping` to fill any gaps, so a
//! named adapter never has to special-case every field.

use serde_json::Value;
use stitch_store::WebhookSource;

use crate::jsonpath::resolve_string;

/// Entity fields extracted from an inbound payload, ready for
/// `stitch_store::EntityUpsert`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEntity {
  pub name: String,
  pub email: Option<String>,
  pub avatar: Option<String>,
  pub entity_type: String,
  pub metadata: Value,
}

pub trait SourceAdapter: Send + Sync {
  /// A human-meaningful event discriminator for logging/journey metadata,
  /// e.g. `"checkout.session.completed"`.
  fn event_type(&self, payload: &Value) -> Option<String>;

  /// Extracts entity fields using source-specific rules, then fills any
  /// `None`/default gaps from the generic `entity_mapping` fallback.
  fn extract_entity(&self, payload: &Value, entity_mapping: &Value) -> ExtractedEntity;
}

/// Resolves the adapter for a webhook config's declared `source`.
pub fn adapter_for(source: WebhookSource) -> Box<dyn SourceAdapter> {
  match source {
    WebhookSource::Stripe => Box::new(StripeAdapter),
    WebhookSource::Typeform => Box::new(TypeformAdapter),
    WebhookSource::Calendly => Box::new(CalendlyAdapter),
    WebhookSource::N8n => Box::new(GenericAdapter { default_entity_type: "contact" }),
    WebhookSource::Custom => Box::new(GenericAdapter { default_entity_type: "contact" }),
  }
}

/// Fills `target`'s unset fields from `entity_mapping`'s dot-paths into
/// `payload`.
fn fill_from_generic_mapping(mut target: ExtractedEntity, payload: &Value, entity_mapping: &Value) -> ExtractedEntity {
  if target.email.is_none() {
    target.email = entity_mapping
      .get("email")
      .and_then(Value::as_str)
      .and_then(|path| resolve_string(payload, path));
  }
  if target.name.is_empty() {
    if let Some(name) = entity_mapping
      .get("name")
      .and_then(Value::as_str)
      .and_then(|path| resolve_string(payload, path))
    {
      target.name = name;
    }
  }
  if target.avatar.is_none() {
    target.avatar = entity_mapping
      .get("avatar")
      .and_then(Value::as_str)
      .and_then(|path| resolve_string(payload, path));
  }
  if let Some(entity_type) = entity_mapping.get("entity_type").and_then(Value::as_str) {
    target.entity_type = entity_type.to_string();
  }
  target
}

struct StripeAdapter;

impl SourceAdapter for StripeAdapter {
  fn event_type(&self, payload: &Value) -> Option<String> {
    payload.get("type").and_then(Value::as_str).map(str::to_string)
  }

  fn extract_entity(&self, payload: &Value, entity_mapping: &Value) -> ExtractedEntity {
    let object = payload.pointer("/data/object");
    let customer_details = object.and_then(|o| o.get("customer_details"));

    let metadata = serde_json::json!({
      "customer_id": object.and_then(|o| o.get("customer")),
      "payment_status": object.and_then(|o| o.get("payment_status")),
      "amount": object.and_then(|o| o.get("amount_total").or_else(|| o.get("amount"))),
      "currency": object.and_then(|o| o.get("currency")),
    });

    let extracted = ExtractedEntity {
      name: customer_details
        .and_then(|c| c.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string(),
      email: customer_details
        .and_then(|c| c.get("email"))
        .and_then(Value::as_str)
        .map(str::to_string),
      avatar: None,
      entity_type: "customer".to_string(),
      metadata,
    };
    fill_from_generic_mapping(extracted, payload, entity_mapping)
  }
}

struct TypeformAdapter;

impl SourceAdapter for TypeformAdapter {
  fn event_type(&self, payload: &Value) -> Option<String> {
    payload.get("event_type").and_then(Value::as_str).map(str::to_string)
  }

  fn extract_entity(&self, payload: &Value, entity_mapping: &Value) -> ExtractedEntity {
    let answers = payload
      .pointer("/form_response/answers")
      .and_then(Value::as_array)
      .cloned()
      .unwrap_or_default();

    let email = answers
      .iter()
      .find(|a| a.get("type").and_then(Value::as_str) == Some("email"))
      .and_then(|a| a.get("email"))
      .and_then(Value::as_str)
      .map(str::to_string);

    let name = answers
      .iter()
      .find(|a| {
        a.get("type").and_then(Value::as_str) == Some("text")
          && a
            .pointer("/field/ref")
            .and_then(Value::as_str)
            .is_some_and(|r| r.to_lowercase().contains("name"))
      })
      .and_then(|a| a.get("text"))
      .and_then(Value::as_str)
      .map(str::to_string)
      .unwrap_or_default();

    let extracted = ExtractedEntity {
      name,
      email,
      avatar: None,
      entity_type: "respondent".to_string(),
      metadata: serde_json::json!({ "answers": answers }),
    };
    fill_from_generic_mapping(extracted, payload, entity_mapping)
  }
}

struct CalendlyAdapter;

impl SourceAdapter for CalendlyAdapter {
  fn event_type(&self, payload: &Value) -> Option<String> {
    payload.get("event").and_then(Value::as_str).map(str::to_string)
  }

  fn extract_entity(&self, payload: &Value, entity_mapping: &Value) -> ExtractedEntity {
    let invitee = payload.pointer("/payload/invitee");

    let extracted = ExtractedEntity {
      name: invitee
        .and_then(|i| i.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string(),
      email: invitee.and_then(|i| i.get("email")).and_then(Value::as_str).map(str::to_string),
      avatar: None,
      entity_type: "invitee".to_string(),
      metadata: serde_json::json!({ "invitee": invitee }),
    };
    fill_from_generic_mapping(extracted, payload, entity_mapping)
  }
}

/// n8n and custom sources fall straight through to the generic
/// JSON-path mapping on `entity_mapping`; there's no source-specific
/// payload shape to special-case.
struct GenericAdapter {
  default_entity_type: &'static str,
}

impl SourceAdapter for GenericAdapter {
  fn event_type(&self, payload: &Value) -> Option<String> {
    payload
      .get("event")
      .or_else(|| payload.get("type"))
      .and_then(Value::as_str)
      .map(str::to_string)
  }

  fn extract_entity(&self, payload: &Value, entity_mapping: &Value) -> ExtractedEntity {
    let extracted = ExtractedEntity {
      name: String::new(),
      email: None,
      avatar: None,
      entity_type: self.default_entity_type.to_string(),
      metadata: Value::Object(serde_json::Map::new()),
    };
    fill_from_generic_mapping(extracted, payload, entity_mapping)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stripe_extracts_customer_details() {
    let payload = serde_json::json!({
      "type": "checkout.session.completed",
      "data": {"object": {
        "customer_details": {"email": "a@x.com", "name": "A"},
        "amount_total": 1999,
        "currency": "usd",
      }}
    });
    let adapter = adapter_for(WebhookSource::Stripe);
    let extracted = adapter.extract_entity(&payload, &Value::Null);
    assert_eq!(extracted.email.as_deref(), Some("a@x.com"));
    assert_eq!(extracted.name, "A");
    assert_eq!(adapter.event_type(&payload).as_deref(), Some("checkout.session.completed"));
  }

  #[test]
  fn generic_mapping_fills_n8n_gaps() {
    let payload = serde_json::json!({"lead": {"email": "b@x.com", "full_name": "B"}});
    let mapping = serde_json::json!({"email": "lead.email", "name": "lead.full_name"});
    let adapter = adapter_for(WebhookSource::N8n);
    let extracted = adapter.extract_entity(&payload, &mapping);
    assert_eq!(extracted.email.as_deref(), Some("b@x.com"));
    assert_eq!(extracted.name, "B");
  }

  #[test]
  fn calendly_reads_invitee() {
    let payload = serde_json::json!({
      "event": "invitee.created",
      "payload": {"invitee": {"email": "c@x.com", "name": "C"}}
    });
    let adapter = adapter_for(WebhookSource::Calendly);
    let extracted = adapter.extract_entity(&payload, &Value::Null);
    assert_eq!(extracted.email.as_deref(), Some("c@x.com"));
  }
}
