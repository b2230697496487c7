//! # Voice billing
//!
//! The counter dictates a bill in Hindi or Hinglish ("Raju ko 10 bori urea IPL,
//! 2000 jama"). The browser does speech-to-text; this module sends the text
//! to an OpenAI-compatible chat completion endpoint together with the shop's
//! catalog, and parses the answer into a [`VoiceDraft`].
//!
//! The model's answer is never trusted as-is. [`crate::resolve`] matches every
//! name it produced against the real catalog before the counter sees it.
use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{Customer, PaymentMode, Product, TxnType};

const SYSTEM_PROMPT: &str = "You are a helpful assistant that outputs only valid JSON.";
const TEMPERATURE: f32 = 0.1;
const TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("voice assistant is not configured")]
    NotConfigured,

    #[error("Invalid JSON response from AI")]
    InvalidJson,

    #[error("assistant request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("assistant returned {status}: {body}")]
    Upstream { status: u16, body: String },
}

/// What the model claims was said.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceDraft {
    #[serde(rename = "type", default, deserialize_with = "lenient_type")]
    pub txn_type: TxnType,
    #[serde(default, deserialize_with = "lenient_string")]
    pub customer_name: String,
    #[serde(default, deserialize_with = "lenient_items")]
    pub items: Vec<VoiceItem>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub total_amount: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub paid_amount: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_mode")]
    pub payment_mode: PaymentMode,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub labour_charges: Option<Decimal>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceItem {
    #[serde(default, deserialize_with = "lenient_string")]
    pub item_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub company: String,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub qty: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub rate: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub amount: Option<Decimal>,
}

/// Turns a transcript into a draft, given what the shop stocks and who it sells to.
#[async_trait]
pub trait Assistant: Send + Sync {
    async fn extract(
        &self,
        voice_text: &str,
        products: &[Product],
        customers: &[Customer],
    ) -> Result<VoiceDraft, VoiceError>;
}

pub struct GroqAssistant {
    client: Client,
    api_key: String,
    url: String,
    model: String,
}

impl GroqAssistant {
    pub fn new(api_key: String, url: String, model: String) -> Result<Self, VoiceError> {
        Ok(Self {
            client: Client::builder().timeout(TIMEOUT).build()?,
            api_key,
            url,
            model,
        })
    }
}

#[async_trait]
impl Assistant for GroqAssistant {
    async fn extract(
        &self,
        voice_text: &str,
        products: &[Product],
        customers: &[Customer],
    ) -> Result<VoiceDraft, VoiceError> {
        let body = json!({
            "model": self.model,
            "temperature": TEMPERATURE,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": build_prompt(voice_text, products, customers) },
            ],
        });

        let res = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!("Assistant returned {status}: {body}");
            return Err(VoiceError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let completion: Value = res.json().await?;
        let content = completion
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default();

        debug!("Assistant answered: {content}");
        parse_answer(content)
    }
}

pub fn build_prompt(voice_text: &str, products: &[Product], customers: &[Customer]) -> String {
    let product_list = products
        .iter()
        .map(|p| {
            let company = if p.company.is_empty() { "Generic" } else { &p.company };
            format!("{} ({}) - Rs.{}", p.item_name, company, p.rate.normalize())
        })
        .collect::<Vec<_>>()
        .join(", ");

    let customer_list = customers
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"You are a billing assistant for a fertilizer shop in India.
Extract transaction details from the following Hindi/Hinglish voice command: "{voice_text}"

Context:
- Available Products: {product_list}
- Existing Customers: {customer_list}

Output JSON format only (no markdown, no explanations):
{{
    "type": "SALE" (default) or "PAYMENT" (if only money is paid) or "PURCHASE",
    "customerName": "string (match from list if possible, else use as is. If 'cash sale' or undefined, leave empty)",
    "items": [
        {{ "itemName": "string (match from available products)", "company": "string", "qty": number, "rate": number, "amount": number }}
    ],
    "totalAmount": number,
    "paidAmount": number (if mentioned, else 0),
    "paymentMode": "CASH" or "ONLINE" (default CASH),
    "labourCharges": number (if mentioned, else 0),
    "description": "string (optional summary)"
}}

Rules:
1. Auto-calculate amount = qty * rate if not specified.
2. If rate is not specified in command, use the rate from Available Products.
3. If customer is not specified, leave customerName empty.
4. If "udhaar" or "due" is mentioned, paidAmount should be 0.
5. "bori" and "bag" mean the same unit."#
    )
}

/// Models like to wrap JSON mode answers in markdown fences anyway.
pub fn strip_fences(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```JSON"))
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);

    text.strip_suffix("```").unwrap_or(text).trim()
}

pub fn parse_answer(text: &str) -> Result<VoiceDraft, VoiceError> {
    serde_json::from_str(strip_fences(text)).map_err(|e| {
        warn!("Failed to parse assistant answer ({e}): {text}");
        VoiceError::InvalidJson
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    })
}

fn lenient_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.trim().trim_start_matches("Rs.").trim().replace(',', ""),
        _ => return Ok(None),
    };

    Ok(Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok())
}

/// `null` or a non-array is no items; entries that are not objects are skipped.
fn lenient_items<'de, D>(deserializer: D) -> Result<Vec<VoiceItem>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(Value::Array(entries)) = Option::<Value>::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };

    Ok(entries
        .into_iter()
        .filter(Value::is_object)
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect())
}

fn lenient_type<'de, D>(deserializer: D) -> Result<TxnType, D::Error>
where
    D: Deserializer<'de>,
{
    let text = lenient_string(deserializer)?.to_uppercase();

    Ok(match text.as_str() {
        "PURCHASE" => TxnType::Purchase,
        "PAYMENT" => TxnType::Payment,
        "EXPENSE" => TxnType::Expense,
        _ => TxnType::Sale,
    })
}

fn lenient_mode<'de, D>(deserializer: D) -> Result<PaymentMode, D::Error>
where
    D: Deserializer<'de>,
{
    let text = lenient_string(deserializer)?.to_uppercase();

    Ok(match text.as_str() {
        "ONLINE" | "UPI" => PaymentMode::Online,
        _ => PaymentMode::Cash,
    })
}
