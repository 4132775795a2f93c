//! Webhook ingress, source adapters, signature verification, and rate
//! limiting (C7, C9).

mod adapters;
mod error;
mod ingress;
mod jsonpath;
mod ratelimit;
mod signature;

pub use adapters::{ExtractedEntity, SourceAdapter, adapter_for};
pub use error::WebhookError;
pub use ingress::{IngressResult, WebhookProcessor};
pub use ratelimit::{RateLimitDecision, RateLimiter};
pub use signature::HeaderLookup;
