//! AI content generation and its deterministic, panic-free fallback (C7).
//!
//! Every event type handled by the scheduler or the queue processor has a
//! system prompt and a default subject here, plus a fallback renderer that
//! never fails — if the LLM call errors out, callers use `fallback()`
//! directly instead of failing the send.

use std::collections::HashMap;

use std::sync::LazyLock;

use llm_client::{ChatRequest, LlmClient, Message};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("no LLM client configured")]
    NotConfigured,

    #[error(transparent)]
    Llm(#[from] llm_client::LlmError),
}

pub struct Enhanced {
    pub subject: Option<String>,
    pub body: String,
}

struct EventPrompt {
    system_prompt: &'static str,
    default_subject: &'static str,
}

static EVENT_PROMPTS: LazyLock<HashMap<&'static str, EventPrompt>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    m.insert(
        "service_reminder",
        EventPrompt {
            system_prompt: "You are writing a friendly service reminder for an equipment dealership's customer. Keep it warm, brief, and specific to their machine.",
            default_subject: "Time for your equipment's next service",
        },
    );
    m.insert(
        "appointment_confirmation",
        EventPrompt {
            system_prompt: "You are confirming an upcoming service appointment for an equipment dealership's customer. Be clear about the date and time, and reassuring.",
            default_subject: "Your appointment is confirmed",
        },
    );
    m.insert(
        "past_due_invoice",
        EventPrompt {
            system_prompt: "You are writing a polite but firm past-due invoice reminder for an equipment dealership's customer. Do not threaten; state the balance and due date plainly.",
            default_subject: "A friendly reminder about your account balance",
        },
    );
    m.insert(
        "work_order_status",
        EventPrompt {
            system_prompt: "You are updating a customer on the status of their equipment repair work order. Be concise and specific to the equipment involved.",
            default_subject: "An update on your repair",
        },
    );
    m.insert(
        "seven_day_checkin",
        EventPrompt {
            system_prompt: "You are checking in with a customer one week after they took delivery of new equipment. Ask if they have questions, keep it short.",
            default_subject: "How's your new equipment working out?",
        },
    );
    m.insert(
        "post_service_survey",
        EventPrompt {
            system_prompt: "You are asking a customer to rate their recent service experience. Keep it to a single short ask.",
            default_subject: "How did we do?",
        },
    );
    m.insert(
        "annual_tuneup",
        EventPrompt {
            system_prompt: "You are reminding a customer that their equipment's annual tune-up is coming due. Be helpful, not pushy.",
            default_subject: "Your annual tune-up is coming up",
        },
    );
    m.insert(
        "seasonal_spring",
        EventPrompt {
            system_prompt: "You are sending a spring maintenance reminder to an equipment dealership's customer base. Keep it general and useful.",
            default_subject: "Get your equipment ready for spring",
        },
    );
    m.insert(
        "seasonal_fall",
        EventPrompt {
            system_prompt: "You are sending a fall maintenance reminder to an equipment dealership's customer base. Keep it general and useful.",
            default_subject: "Get your equipment ready for fall",
        },
    );
    m.insert(
        "ghost_customer",
        EventPrompt {
            system_prompt: "You are writing a win-back message to a customer who hasn't ordered in a while. Be warm, not guilt-inducing.",
            default_subject: "We'd love to see you again",
        },
    );
    m.insert(
        "anniversary_offer",
        EventPrompt {
            system_prompt: "You are celebrating the anniversary of a customer's equipment purchase with a small offer. Keep it upbeat.",
            default_subject: "Happy anniversary from your equipment dealer",
        },
    );
    m.insert(
        "warranty_expiration",
        EventPrompt {
            system_prompt: "You are warning a customer that their equipment warranty is expiring soon. Be informative, not alarming.",
            default_subject: "Your warranty is expiring soon",
        },
    );
    m.insert(
        "trade_in",
        EventPrompt {
            system_prompt: "You are suggesting a customer consider trading in older, heavily-repaired equipment. Be consultative, not salesy.",
            default_subject: "Is it time to consider a trade-in?",
        },
    );
    m.insert(
        "first_service",
        EventPrompt {
            system_prompt: "You are reminding a customer that their new equipment has reached the hours for its first service. Keep it practical.",
            default_subject: "Your equipment's first service is due",
        },
    );
    m.insert(
        "usage_service",
        EventPrompt {
            system_prompt: "You are reminding a customer that their equipment has reached its next usage-based service interval.",
            default_subject: "Your equipment is due for service",
        },
    );
    m.insert(
        "work_order_receipt",
        EventPrompt {
            system_prompt: "You are sending a receipt for a completed work order. State what was done and the total plainly.",
            default_subject: "Your work order receipt",
        },
    );
    m.insert(
        "sales_order_receipt",
        EventPrompt {
            system_prompt: "You are sending a receipt for a sales order. Thank the customer and summarize what they purchased.",
            default_subject: "Your order receipt",
        },
    );
    m.insert(
        "estimate_followup",
        EventPrompt {
            system_prompt: "You are following up on an estimate the customer hasn't responded to yet. Be low-pressure and offer to answer questions.",
            default_subject: "Following up on your estimate",
        },
    );
    m.insert(
        "job_complete",
        EventPrompt {
            system_prompt: "You are letting a customer know their job is complete and ready for pickup or delivery.",
            default_subject: "Your job is complete",
        },
    );
    m.insert(
        "contact_form_buying",
        EventPrompt {
            system_prompt: "You are responding to a website contact form submission from someone interested in buying equipment. Be helpful and prompt.",
            default_subject: "Thanks for reaching out",
        },
    );
    m.insert(
        "contact_form_repairing",
        EventPrompt {
            system_prompt: "You are responding to a website contact form submission from someone who needs a repair. Be reassuring about next steps.",
            default_subject: "Thanks for reaching out about your repair",
        },
    );
    m.insert(
        "winback_missed_you",
        EventPrompt {
            system_prompt: "You are sending a light winback message to a lapsed customer. Keep it short and friendly, no guilt.",
            default_subject: "We've missed you",
        },
    );
    m
});

/// Holds the configured LLM client (if any) and the model to use. Built once
/// from `Config` at startup and shared by the template renderer and queue
/// processor.
#[derive(Clone)]
pub struct AiGenerator {
    client: Option<LlmClient>,
    model: String,
}

impl AiGenerator {
    pub fn new(client: Option<LlmClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            client: None,
            model: String::new(),
        }
    }

    /// Generates enhanced content for `event_type`. Fails if no client is
    /// configured or the call errors — callers should fall back to
    /// [`fallback`] on `Err` rather than propagate the failure to the send.
    ///
    /// `seed`, when given, is a template's already-rendered text body; the
    /// LLM is asked to rewrite it rather than invent content from scratch,
    /// so the template's actual values survive enhancement. With no seed,
    /// `params` is listed as "Key: Value" pairs instead.
    pub async fn generate(
        &self,
        event_type: &str,
        params: &HashMap<String, String>,
        seed: Option<&str>,
        subject_override: Option<&str>,
        company_name: &str,
        ai_instructions: Option<&str>,
    ) -> Result<Enhanced, AiError> {
        let client = self.client.as_ref().ok_or(AiError::NotConfigured)?;
        let prompt = EVENT_PROMPTS.get(event_type);

        let mut system_prompt = prompt
            .map(|p| p.system_prompt.to_string())
            .unwrap_or_else(|| format!("You are writing a brief, friendly customer message for {company_name}."));
        if let Some(extra) = ai_instructions {
            system_prompt.push_str("\n\nAdditional instructions: ");
            system_prompt.push_str(extra);
        }

        let user_message = user_message_for(seed, params, company_name);

        let request = ChatRequest::new(&self.model)
            .message(Message::system(system_prompt))
            .message(Message::user(user_message))
            .temperature(0.7)
            .max_tokens(1000);

        let response = client.chat_completion(request).await?;

        Ok(Enhanced {
            subject: subject_override.map(str::to_string),
            body: response.content,
        })
    }
}

/// Builds the prompt body: a rewrite of `seed` when given (the template's
/// already-rendered text), otherwise a `Key: Value` listing of `params`.
fn user_message_for(seed: Option<&str>, params: &HashMap<String, String>, company_name: &str) -> String {
    match seed {
        Some(body) => format!(
            "Company: {company_name}\n\nRewrite the following message to be warmer and more natural. \
             Keep every fact, name, and number exactly as given:\n\n{body}"
        ),
        None => {
            let context: String = params.iter().map(|(k, v)| format!("{k}: {v}")).collect::<Vec<_>>().join("\n");
            format!("Company: {company_name}\n\n{context}")
        }
    }
}

/// Deterministic, never-failing content used when AI enhancement is
/// unavailable or disabled for an event type.
pub fn fallback(event_type: &str, params: &HashMap<String, String>, company_name: &str) -> Enhanced {
    let prompt = EVENT_PROMPTS.get(event_type);
    let subject = prompt
        .map(|p| p.default_subject.to_string())
        .unwrap_or_else(|| format!("A message from {company_name}"));

    let body = match params.get("first_name") {
        Some(name) => format!("Hi {name},\n\nThis is a message from {company_name}.\n\n{company_name}"),
        None => format!("Hello,\n\nThis is a message from {company_name}.\n\n{company_name}"),
    };

    Enhanced {
        subject: Some(subject),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_never_panics_on_unknown_event_type() {
        let params = HashMap::new();
        let enhanced = fallback("totally_unknown_event", &params, "Acme Equipment");
        assert_eq!(enhanced.subject.as_deref(), Some("A message from Acme Equipment"));
    }

    #[test]
    fn fallback_greets_by_first_name_when_present() {
        let mut params = HashMap::new();
        params.insert("first_name".to_string(), "Jo".to_string());
        let enhanced = fallback("service_reminder", &params, "Acme Equipment");
        assert!(enhanced.body.starts_with("Hi Jo,"));
    }

    #[test]
    fn seed_present_asks_for_a_rewrite_of_the_rendered_body() {
        let params = HashMap::new();
        let message = user_message_for(Some("Hi Dana, your Model X is due for service."), &params, "Acme Equipment");
        assert!(message.contains("Rewrite the following message"));
        assert!(message.contains("Hi Dana, your Model X is due for service."));
    }

    #[test]
    fn no_seed_falls_back_to_a_key_value_listing_of_params() {
        let mut params = HashMap::new();
        params.insert("first_name".to_string(), "Dana".to_string());
        let message = user_message_for(None, &params, "Acme Equipment");
        assert!(!message.contains("Rewrite the following message"));
        assert!(message.contains("first_name: Dana"));
    }

    #[test]
    fn known_event_types_cover_scheduler_and_receipt_events() {
        for event in [
            "service_reminder",
            "work_order_receipt",
            "contact_form_buying",
            "winback_missed_you",
        ] {
            assert!(EVENT_PROMPTS.contains_key(event), "missing prompt for {event}");
        }
    }
}
