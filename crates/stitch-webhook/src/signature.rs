//! Per-source signature verification (C9) step 5.
//!
//! Every comparison is constant-time (`subtle::ConstantTimeEq`) to avoid
//! leaking timing information about a partially-correct signature. A
//! missing secret on the webhook config skips verification entirely
//! (accept); a secret present with no signature header is always rejected.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use stitch_store::WebhookSource;
use subtle::ConstantTimeEq;

use crate::error::WebhookError;

type HmacSha256 = Hmac<Sha256>;

/// Case-insensitive header lookup, implemented by whatever header map the
/// caller's HTTP framework uses. Keeps this crate decoupled from axum.
pub trait HeaderLookup {
  fn get(&self, name: &str) -> Option<&str>;
}

impl HeaderLookup for std::collections::HashMap<String, String> {
  fn get(&self, name: &str) -> Option<&str> {
    self
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// Verifies an inbound webhook's signature per `source`'s scheme. `Ok(())`
/// both when the signature checks out and when no secret is configured.
pub fn verify(
  source: WebhookSource,
  secret: Option<&str>,
  headers: &impl HeaderLookup,
  raw_body: &[u8],
) -> Result<(), WebhookError> {
  let Some(secret) = secret else {
    return Ok(());
  };

  match source {
    WebhookSource::Stripe => verify_timestamped(headers, "stripe-signature", secret, raw_body, true),
    WebhookSource::Calendly => {
      verify_timestamped(headers, "calendly-webhook-signature", secret, raw_body, true)
    }
    WebhookSource::Typeform => verify_typeform(headers, secret, raw_body),
    WebhookSource::N8n => verify_token(headers, "x-n8n-signature", secret),
    WebhookSource::Custom => verify_generic(headers, secret, raw_body),
  }
}

/// Stripe/Calendly-style: header `t=<ts>,v1=<sig>`; signed payload is
/// `"{t}.{rawBody}"`, hex-compared against `v1`.
fn verify_timestamped(
  headers: &impl HeaderLookup,
  header_name: &str,
  secret: &str,
  raw_body: &[u8],
  hex_sig: bool,
) -> Result<(), WebhookError> {
  let header = headers.get(header_name).ok_or(WebhookError::SignatureInvalid)?;

  let mut timestamp = None;
  let mut signature = None;
  for part in header.split(',') {
    let mut kv = part.splitn(2, '=');
    match (kv.next(), kv.next()) {
      (Some("t"), Some(v)) => timestamp = Some(v),
      (Some("v1"), Some(v)) => signature = Some(v),
      _ => {}
    }
  }
  let (timestamp, signature) = match (timestamp, signature) {
    (Some(t), Some(s)) => (t, s),
    _ => return Err(WebhookError::SignatureInvalid),
  };

  let mut signed_payload = Vec::with_capacity(timestamp.len() + 1 + raw_body.len());
  signed_payload.extend_from_slice(timestamp.as_bytes());
  signed_payload.push(b'.');
  signed_payload.extend_from_slice(raw_body);

  let expected = hmac_digest(secret, &signed_payload);
  let actual = if hex_sig {
    hex_decode(signature).ok_or(WebhookError::SignatureInvalid)?
  } else {
    base64_decode(signature)?
  };

  constant_time_eq(&expected, &actual)
}

/// Typeform-style: header `sha256=<base64 sig>` over the raw body.
fn verify_typeform(
  headers: &impl HeaderLookup,
  secret: &str,
  raw_body: &[u8],
) -> Result<(), WebhookError> {
  let header = headers
    .get("typeform-signature")
    .ok_or(WebhookError::SignatureInvalid)?;
  let encoded = header.strip_prefix("sha256=").ok_or(WebhookError::SignatureInvalid)?;

  let expected = hmac_digest(secret, raw_body);
  let actual = base64_decode(encoded)?;

  constant_time_eq(&expected, &actual)
}

/// n8n: header holds a plain shared token, compared constant-time with no
/// HMAC involved.
fn verify_token(headers: &impl HeaderLookup, header_name: &str, secret: &str) -> Result<(), WebhookError> {
  let token = headers.get(header_name).ok_or(WebhookError::SignatureInvalid)?;
  constant_time_eq(secret.as_bytes(), token.as_bytes())
}

/// Generic fallback: `X-Webhook-Signature` header, hex HMAC-SHA256 of the
/// raw body.
fn verify_generic(
  headers: &impl HeaderLookup,
  secret: &str,
  raw_body: &[u8],
) -> Result<(), WebhookError> {
  let header = headers
    .get("x-webhook-signature")
    .ok_or(WebhookError::SignatureInvalid)?;
  let expected = hmac_digest(secret, raw_body);
  let actual = hex_decode(header).ok_or(WebhookError::SignatureInvalid)?;
  constant_time_eq(&expected, &actual)
}

fn hmac_digest(secret: &str, message: &[u8]) -> Vec<u8> {
  let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
  mac.update(message);
  mac.finalize().into_bytes().to_vec()
}

fn constant_time_eq(expected: &[u8], actual: &[u8]) -> Result<(), WebhookError> {
  if expected.len() == actual.len() && bool::from(expected.ct_eq(actual)) {
    Ok(())
  } else {
    Err(WebhookError::SignatureInvalid)
  }
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
  if s.len() % 2 != 0 {
    return None;
  }
  (0..s.len())
    .step_by(2)
    .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
    .collect()
}

fn base64_decode(s: &str) -> Result<Vec<u8>, WebhookError> {
  use base64::Engine;
  base64::engine::general_purpose::STANDARD
    .decode(s)
    .map_err(|_| WebhookError::SignatureInvalid)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn headers(pairs: &[(&str, &str)]) -> std::collections::HashMap<String, String> {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  #[test]
  fn missing_secret_skips_verification() {
    let h = headers(&[]);
    assert!(verify(WebhookSource::Stripe, None, &h, b"{}").is_ok());
  }

  #[test]
  fn stripe_style_roundtrip() {
    let secret = "whsec_ABC";
    let raw_body = br#"{"type":"checkout.session.completed"}"#;
    let timestamp = "1700000000";
    let mut signed_payload = Vec::new();
    signed_payload.extend_from_slice(timestamp.as_bytes());
    signed_payload.push(b'.');
    signed_payload.extend_from_slice(raw_body);
    let digest = hmac_digest(secret, &signed_payload);
    let sig_hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();

    let h = headers(&[("Stripe-Signature", &format!("t={timestamp},v1={sig_hex}"))]);
    assert!(verify(WebhookSource::Stripe, Some(secret), &h, raw_body).is_ok());
  }

  #[test]
  fn stripe_style_rejects_wrong_signature() {
    let h = headers(&[("Stripe-Signature", "t=1700000000,v1=deadbeef")]);
    assert!(verify(WebhookSource::Stripe, Some("whsec_ABC"), &h, b"{}").is_err());
  }

  #[test]
  fn missing_header_with_secret_present_rejects() {
    let h = headers(&[]);
    assert!(verify(WebhookSource::Stripe, Some("whsec_ABC"), &h, b"{}").is_err());
  }

  #[test]
  fn n8n_token_constant_time_match() {
    let h = headers(&[("X-N8n-Signature", "shared-token")]);
    assert!(verify(WebhookSource::N8n, Some("shared-token"), &h, b"{}").is_ok());
    let wrong = headers(&[("X-N8n-Signature", "wrong-token")]);
    assert!(verify(WebhookSource::N8n, Some("shared-token"), &wrong, b"{}").is_err());
  }
}
