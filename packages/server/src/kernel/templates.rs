//! Message templates: tenant-override-then-global resolution and
//! `{{var}}` substitution (C6).

use std::collections::HashMap;

use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use thiserror::Error;
use tracing::warn;

use crate::common::TenantId;
use crate::kernel::ai::AiGenerator;
use crate::kernel::central_store::CentralStore;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("no template found for event_type {0:?} / communication_type {1:?}")]
    NotFound(String, String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Template {
    pub tenant_id: Option<TenantId>,
    pub event_type: String,
    pub communication_type: String,
    pub subject_template: Option<String>,
    pub body_text_template: String,
    pub body_html_template: Option<String>,
    pub variables: Value,
    pub ai_enhance: bool,
    pub ai_instructions: Option<String>,
    pub is_active: bool,
    pub version: i32,
}

/// The final, rendered message ready to hand to a provider adapter.
#[derive(Debug, Clone)]
pub struct RenderedMessage {
    pub subject: Option<String>,
    pub body_text: String,
    pub body_html: Option<String>,
}

/// Loads and caches templates, resolving tenant-specific overrides before
/// falling back to the tenant-agnostic global template (C6).
#[derive(Clone)]
pub struct TemplateStore {
    cache: DashMap<(String, String), Template>,
    placeholder: Regex,
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self {
            cache: DashMap::new(),
            placeholder: Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("static regex"),
        }
    }
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn cache_key(tenant_id: Option<TenantId>, event_type: &str, communication_type: &str) -> (String, String) {
        let scope = tenant_id.map(|id| id.to_string()).unwrap_or_else(|| "global".to_string());
        (format!("{scope}:{event_type}"), communication_type.to_string())
    }

    pub async fn load(
        &self,
        store: &CentralStore,
        event_type: &str,
        tenant_id: Option<TenantId>,
        communication_type: &str,
    ) -> Result<Template, TemplateError> {
        let key = Self::cache_key(tenant_id, event_type, communication_type);
        if let Some(template) = self.cache.get(&key) {
            return Ok(template.clone());
        }

        let template = if let Some(tenant_id) = tenant_id {
            let tenant_specific = sqlx::query_as::<_, Template>(
                r#"
                SELECT tenant_id, event_type, communication_type, subject_template,
                       body_text_template, body_html_template, variables,
                       ai_enhance, ai_instructions, is_active, version
                FROM message_templates
                WHERE tenant_id = $1 AND event_type = $2 AND communication_type = $3 AND is_active
                ORDER BY version DESC
                LIMIT 1
                "#,
            )
            .bind(tenant_id)
            .bind(event_type)
            .bind(communication_type)
            .fetch_optional(store.pool())
            .await?;

            match tenant_specific {
                Some(t) => t,
                None => self.load_global(store, event_type, communication_type).await?,
            }
        } else {
            self.load_global(store, event_type, communication_type).await?
        };

        self.cache.insert(key, template.clone());
        Ok(template)
    }

    async fn load_global(
        &self,
        store: &CentralStore,
        event_type: &str,
        communication_type: &str,
    ) -> Result<Template, TemplateError> {
        sqlx::query_as::<_, Template>(
            r#"
            SELECT tenant_id, event_type, communication_type, subject_template,
                   body_text_template, body_html_template, variables,
                   ai_enhance, ai_instructions, is_active, version
            FROM message_templates
            WHERE tenant_id IS NULL AND event_type = $1 AND communication_type = $2 AND is_active
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(event_type)
        .bind(communication_type)
        .fetch_optional(store.pool())
        .await?
        .ok_or_else(|| TemplateError::NotFound(event_type.to_string(), communication_type.to_string()))
    }

    /// Substitutes every `{{var}}` placeholder found in `text` with the
    /// matching value from `params`. Missing variables render as an empty
    /// string rather than failing the whole render.
    pub fn substitute(&self, text: &str, params: &HashMap<String, String>) -> String {
        self.placeholder
            .replace_all(text, |caps: &regex::Captures| {
                params.get(&caps[1]).cloned().unwrap_or_default()
            })
            .into_owned()
    }

    fn text_to_html(text: &str) -> String {
        text.split('\n')
            .map(|line| format!("<p>{}</p>", html_escape(line)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Renders `template` against `params`, optionally running the result
    /// through AI enhancement. Any AI failure falls back to the plain
    /// substitution render — a flaky LLM call must never block a send.
    pub async fn render(
        &self,
        template: &Template,
        params: &HashMap<String, String>,
        event_type: &str,
        company_name: &str,
        ai: &AiGenerator,
    ) -> RenderedMessage {
        let subject = template.subject_template.as_ref().map(|s| self.substitute(s, params));
        let body_text = self.substitute(&template.body_text_template, params);
        let body_html = match &template.body_html_template {
            Some(html) => Some(self.substitute(html, params)),
            None => Some(Self::text_to_html(&body_text)),
        };

        if !template.ai_enhance {
            return RenderedMessage {
                subject,
                body_text,
                body_html,
            };
        }

        match ai
            .generate(
                event_type,
                params,
                Some(body_text.as_str()),
                subject.as_deref(),
                company_name,
                template.ai_instructions.as_deref(),
            )
            .await
        {
            Ok(enhanced) => RenderedMessage {
                subject: enhanced.subject.or(subject),
                body_html: Some(Self::text_to_html(&enhanced.body)),
                body_text: enhanced.body,
            },
            Err(err) => {
                warn!(error = %err, event_type, "ai enhancement failed, using plain render");
                RenderedMessage {
                    subject,
                    body_text,
                    body_html,
                }
            }
        }
    }
}

fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_fills_known_vars_and_blanks_unknown() {
        let store = TemplateStore::new();
        let mut params = HashMap::new();
        params.insert("first_name".to_string(), "Dana".to_string());

        let rendered = store.substitute("Hi {{first_name}}, your {{widget}} is ready.", &params);
        assert_eq!(rendered, "Hi Dana, your  is ready.");
    }

    #[test]
    fn text_to_html_wraps_each_line_in_a_paragraph() {
        let html = TemplateStore::text_to_html("line one\nline two");
        assert_eq!(html, "<p>line one</p>\n<p>line two</p>");
    }

    #[test]
    fn cache_key_uses_global_sentinel_when_tenant_absent() {
        let (scope, comm) = TemplateStore::cache_key(None, "service_reminder", "email");
        assert_eq!(scope, "global:service_reminder");
        assert_eq!(comm, "email");
    }
}
