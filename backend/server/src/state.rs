use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use super::{
    config::{Config, StoreKind},
    database::RedisStore,
    mailer::{LogMailer, Mailer, WebhookMailer},
    store::{MemoryStore, Store},
    voice::{Assistant, GroqAssistant},
};

pub struct State {
    pub config: Config,
    pub store: Arc<dyn Store>,
    /// `None` when no `GROQ_API_KEY` is set; voice billing then answers 503.
    pub assistant: Option<Arc<dyn Assistant>>,
    pub mailer: Arc<dyn Mailer>,
}

impl State {
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let store: Arc<dyn Store> = match config.store {
            StoreKind::Redis => Arc::new(RedisStore::connect(&config.redis_url).await?),
            StoreKind::Memory => {
                warn!("Using in-memory store, data is lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        let assistant: Option<Arc<dyn Assistant>> = match &config.groq_key {
            Some(key) => Some(Arc::new(GroqAssistant::new(
                key.clone(),
                config.groq_url.clone(),
                config.groq_model.clone(),
            )?)),
            None => {
                warn!("GROQ_API_KEY not set, voice billing disabled");
                None
            }
        };

        let mailer: Arc<dyn Mailer> = match &config.mail_webhook_url {
            Some(url) => Arc::new(WebhookMailer::new(url.clone(), config.mail_from.clone())?),
            None => {
                info!("MAIL_WEBHOOK_URL not set, mail goes to the log");
                Arc::new(LogMailer)
            }
        };

        Ok(Self::with(config, store, assistant, mailer))
    }

    /// Wires a state from ready-made parts.
    pub fn with(
        config: Config,
        store: Arc<dyn Store>,
        assistant: Option<Arc<dyn Assistant>>,
        mailer: Arc<dyn Mailer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            assistant,
            mailer,
        })
    }
}
