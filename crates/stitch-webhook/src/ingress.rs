//! Webhook ingress pipeline (C7): parse, match the endpoint, verify the
//! signature, extract the entity, and fan out into a run. Rate limiting
//! runs before this pipeline and is the caller's responsibility via
//! [`crate::RateLimiter`], since it must happen before the body is even
//! read.

use std::sync::Arc;

use serde_json::Value;
use stitch_engine::Engine;
use stitch_store::{
  EntityUpsert, JourneyEventType, NewJourneyEvent, NewWebhookEvent, Store, Trigger, TriggerType,
  WebhookEventStatus,
};

use crate::adapters::adapter_for;
use crate::error::WebhookError;
use crate::signature::{self, HeaderLookup};

/// Outcome of a successful ingestion.
#[derive(Debug, Clone)]
pub struct IngressResult {
  pub webhook_event_id: String,
  pub entity_id: String,
  pub run_id: String,
}

pub struct WebhookProcessor {
  store: Arc<dyn Store>,
  engine: Arc<Engine>,
}

impl WebhookProcessor {
  pub fn new(store: Arc<dyn Store>, engine: Arc<Engine>) -> Self {
    Self { store, engine }
  }

  /// Runs the full ingest pipeline (body parse through run start) for a
  /// single inbound delivery.
  #[tracing::instrument(skip(self, raw_body, headers), fields(slug))]
  pub async fn ingest(
    &self,
    slug: &str,
    raw_body: &[u8],
    headers: &impl HeaderLookup,
  ) -> Result<IngressResult, WebhookError> {
    let payload: Value =
      serde_json::from_slice(raw_body).map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

    let config = self
      .store
      .get_webhook_config_by_slug(slug)
      .await?
      .filter(|c| c.is_active)
      .ok_or_else(|| WebhookError::ConfigMissing(slug.to_string()))?;

    let event = self
      .store
      .create_webhook_event(NewWebhookEvent {
        webhook_config_id: config.id.clone(),
        raw_payload: payload.clone(),
      })
      .await?;

    match self.process(&config, &event.id, &payload, headers, raw_body).await {
      Ok((entity_id, run_id)) => {
        self
          .store
          .update_webhook_event_status(
            &event.id,
            WebhookEventStatus::Completed,
            Some(entity_id.clone()),
            Some(run_id.clone()),
            None,
          )
          .await?;
        tracing::info!(webhook_event_id = %event.id, entity_id, run_id, "webhook processed");
        Ok(IngressResult {
          webhook_event_id: event.id,
          entity_id,
          run_id,
        })
      }
      Err(err) => {
        let status = match &err {
          WebhookError::SignatureInvalid => WebhookEventStatus::SignatureInvalid,
          _ => WebhookEventStatus::Failed,
        };
        // Best-effort: the event row already exists and should carry the
        // failure even if this follow-up write itself fails.
        let _ = self
          .store
          .update_webhook_event_status(&event.id, status, None, None, Some(err.to_string()))
          .await;
        tracing::warn!(webhook_event_id = %event.id, error = %err, "webhook processing failed");
        Err(err)
      }
    }
  }

  async fn process(
    &self,
    config: &stitch_store::WebhookConfig,
    event_id: &str,
    payload: &Value,
    headers: &impl HeaderLookup,
    raw_body: &[u8],
  ) -> Result<(String, String), WebhookError> {
    signature::verify(config.source, config.secret.as_deref(), headers, raw_body)?;

    let adapter = adapter_for(config.source);
    let extracted = adapter.extract_entity(payload, &config.entity_mapping.0);

    let entity = self
      .store
      .upsert_entity(EntityUpsert {
        canvas_id: config.canvas_id.clone(),
        name: extracted.name,
        email: extracted.email,
        avatar: extracted.avatar,
        entity_type: extracted.entity_type,
        metadata: extracted.metadata,
      })
      .await?;

    self
      .store
      .append_journey_event(NewJourneyEvent {
        entity_id: entity.id.clone(),
        event_type: JourneyEventType::ArrivedVia,
        node_id: None,
        edge_id: Some(config.entry_edge_id.clone()),
        metadata: serde_json::json!({
          "webhook_config_id": config.id,
          "webhook_event_id": event_id,
          "source": config.source,
        }),
      })
      .await?;

    let trigger = Trigger {
      trigger_type: TriggerType::Webhook,
      source: Some(source_label(config.source).to_string()),
      event_id: Some(event_id.to_string()),
      timestamp: chrono::Utc::now(),
    };

    let run = self
      .engine
      .start_run_at(
        &config.workflow_id,
        None,
        Some(entity.id.clone()),
        trigger,
        entry_target_node(&config.entry_edge_id),
      )
      .await?;

    Ok((entity.id, run.id))
  }
}

/// `entry_edge_id` is stored as `stitch_graph::edge_key`'s
/// `"{source}\u{2192}{target}"` form; the walker starts from the edge's
/// *target* node. Configs authored with a bare node
/// id (no arrow) are accepted as-is for convenience.
fn entry_target_node(entry_edge_id: &str) -> &str {
  entry_edge_id.rsplit('\u{2192}').next().unwrap_or(entry_edge_id)
}

fn source_label(source: stitch_store::WebhookSource) -> &'static str {
  match source {
    stitch_store::WebhookSource::Stripe => "stripe",
    stitch_store::WebhookSource::Typeform => "typeform",
    stitch_store::WebhookSource::Calendly => "calendly",
    stitch_store::WebhookSource::N8n => "n8n",
    stitch_store::WebhookSource::Custom => "custom",
  }
}
