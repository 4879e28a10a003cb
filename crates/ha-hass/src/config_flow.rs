//! Config flows
//!
//! A config flow walks the user (or a discovery source) through the steps
//! needed to create a config entry. The [`FlowManager`] keeps flows that
//! are waiting on a form and turns a `CreateEntry` result into an entry.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use ha_config_entries::{ConfigEntriesError, ConfigEntry, ConfigEntrySource};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{setup, HomeAssistant};

/// Data submitted to a flow step
pub type UserInput = HashMap<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Integration {0} does not support config flows")]
    NotSupported(String),

    #[error("Unknown flow: {0}")]
    UnknownFlow(String),

    #[error(transparent)]
    ConfigEntries(#[from] ConfigEntriesError),
}

/// Field of a form shown to the user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub required: bool,
}

impl FormField {
    pub fn required_string(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: "string".to_string(),
            required: true,
        }
    }
}

/// Outcome of a flow step
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowResult {
    Form {
        step_id: String,
        data_schema: Vec<FormField>,
        errors: HashMap<String, String>,
        description_placeholders: HashMap<String, String>,
    },
    CreateEntry {
        title: String,
        data: UserInput,
    },
    Abort {
        reason: String,
    },
}

impl FlowResult {
    pub fn form(step_id: impl Into<String>, data_schema: Vec<FormField>) -> Self {
        FlowResult::Form {
            step_id: step_id.into(),
            data_schema,
            errors: HashMap::new(),
            description_placeholders: HashMap::new(),
        }
    }

    pub fn with_error(mut self, field: &str, error: &str) -> Self {
        if let FlowResult::Form { errors, .. } = &mut self {
            errors.insert(field.to_string(), error.to_string());
        }
        self
    }

    pub fn with_placeholders(mut self, placeholders: HashMap<String, String>) -> Self {
        if let FlowResult::Form {
            description_placeholders,
            ..
        } = &mut self
        {
            *description_placeholders = placeholders;
        }
        self
    }

    pub fn create_entry(title: impl Into<String>, data: UserInput) -> Self {
        FlowResult::CreateEntry {
            title: title.into(),
            data,
        }
    }

    pub fn abort(reason: impl Into<String>) -> Self {
        FlowResult::Abort {
            reason: reason.into(),
        }
    }
}

/// Service found through mDNS
#[derive(Debug, Clone)]
pub struct ZeroconfServiceInfo {
    pub ip_address: IpAddr,
    /// e.g. `vegehub-garden.local.`
    pub hostname: String,
    pub port: Option<u16>,
    pub service_type: String,
    pub name: String,
    pub properties: HashMap<String, String>,
}

/// Per-flow state shared by every flow implementation
#[derive(Debug, Clone, Default)]
pub struct FlowContext {
    pub source: ConfigEntrySource,
    pub unique_id: Option<String>,
    pub title_placeholders: HashMap<String, String>,
}

impl FlowContext {
    pub fn set_unique_id(&mut self, unique_id: impl Into<String>) {
        self.unique_id = Some(unique_id.into());
    }

    /// `Abort("already_configured")` when an entry with this flow's unique id exists
    pub fn abort_if_unique_id_configured(
        &self,
        hass: &HomeAssistant,
        domain: &str,
    ) -> Option<FlowResult> {
        let unique_id = self.unique_id.as_deref()?;
        hass.config_entries
            .get_by_unique_id(domain, unique_id)
            .map(|_| FlowResult::abort("already_configured"))
    }
}

/// How a flow was started
#[derive(Debug, Clone)]
pub enum FlowInit {
    User(Option<UserInput>),
    Zeroconf(ZeroconfServiceInfo),
    Import(UserInput),
}

impl FlowInit {
    fn source(&self) -> ConfigEntrySource {
        match self {
            FlowInit::User(_) => ConfigEntrySource::User,
            FlowInit::Zeroconf(_) => ConfigEntrySource::Zeroconf,
            FlowInit::Import(_) => ConfigEntrySource::Import,
        }
    }
}

#[async_trait]
pub trait ConfigFlow: Send {
    fn context(&self) -> &FlowContext;

    fn context_mut(&mut self) -> &mut FlowContext;

    async fn async_step_user(
        &mut self,
        hass: &Arc<HomeAssistant>,
        user_input: Option<UserInput>,
    ) -> FlowResult;

    async fn async_step_zeroconf(
        &mut self,
        _hass: &Arc<HomeAssistant>,
        _discovery_info: ZeroconfServiceInfo,
    ) -> FlowResult {
        FlowResult::abort("not_implemented")
    }

    /// YAML import runs the user step with the imported data
    async fn async_step_import(
        &mut self,
        hass: &Arc<HomeAssistant>,
        import_data: UserInput,
    ) -> FlowResult {
        self.async_step_user(hass, Some(import_data)).await
    }
}

/// Result of driving a flow one step
#[derive(Debug, Clone)]
pub struct FlowOutcome {
    pub flow_id: String,
    pub handler: String,
    pub result: FlowResult,
    /// Entry created when the step finished the flow
    pub entry: Option<ConfigEntry>,
}

struct FlowInProgress {
    handler: String,
    flow: Box<dyn ConfigFlow>,
}

/// Flows waiting on user input, keyed by flow id
#[derive(Default)]
pub struct FlowManager {
    progress: DashMap<String, Mutex<FlowInProgress>>,
}

impl FlowManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a flow for `domain`
    pub async fn async_init(
        &self,
        hass: &Arc<HomeAssistant>,
        domain: &str,
        init: FlowInit,
    ) -> Result<FlowOutcome, FlowError> {
        let mut flow = hass
            .integration(domain)
            .and_then(|integration| integration.config_flow())
            .ok_or_else(|| FlowError::NotSupported(domain.to_string()))?;

        let flow_id = ulid::Ulid::new().to_string();
        flow.context_mut().source = init.source();
        debug!(%flow_id, domain, source = ?init.source(), "Starting config flow");

        let result = match init {
            FlowInit::User(input) => flow.async_step_user(hass, input).await,
            FlowInit::Zeroconf(info) => flow.async_step_zeroconf(hass, info).await,
            FlowInit::Import(data) => flow.async_step_import(hass, data).await,
        };

        let in_progress = FlowInProgress {
            handler: domain.to_string(),
            flow,
        };
        self.finish_step(hass, flow_id, in_progress, result).await
    }

    /// Submit user input to a flow waiting on a form
    ///
    /// Every form shown by a flow is answered through its user step.
    pub async fn async_configure(
        &self,
        hass: &Arc<HomeAssistant>,
        flow_id: &str,
        user_input: Option<UserInput>,
    ) -> Result<FlowOutcome, FlowError> {
        let (_, slot) = self
            .progress
            .remove(flow_id)
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;

        let mut in_progress = slot.into_inner();
        let result = in_progress.flow.async_step_user(hass, user_input).await;
        self.finish_step(hass, flow_id.to_string(), in_progress, result)
            .await
    }

    async fn finish_step(
        &self,
        hass: &Arc<HomeAssistant>,
        flow_id: String,
        in_progress: FlowInProgress,
        result: FlowResult,
    ) -> Result<FlowOutcome, FlowError> {
        let handler = in_progress.handler.clone();

        let (result, entry) = match result {
            FlowResult::Form { .. } => {
                self.progress
                    .insert(flow_id.clone(), Mutex::new(in_progress));
                (result, None)
            }
            FlowResult::CreateEntry { ref title, ref data } => {
                let entry = {
                    let context = in_progress.flow.context();
                    let mut entry = ConfigEntry::new(handler.as_str(), title.as_str())
                        .with_data(data.clone())
                        .with_source(context.source.clone());
                    entry.unique_id = context.unique_id.clone();
                    entry
                };

                match hass.config_entries.add(entry).await {
                    Ok(entry) => {
                        info!(domain = %handler, title = %entry.title, "Config flow created entry");
                        if let Err(err) = setup::async_setup_entry(hass, &entry.entry_id).await {
                            warn!(entry_id = %entry.entry_id, error = %err, "Setup after flow failed");
                        }
                        let entry = hass.config_entries.get(&entry.entry_id).unwrap_or(entry);
                        (result, Some(entry))
                    }
                    Err(ConfigEntriesError::AlreadyExists { .. }) => {
                        (FlowResult::abort("already_configured"), None)
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            FlowResult::Abort { ref reason } => {
                warn!(domain = %handler, %reason, "Config flow aborted");
                (result, None)
            }
        };

        Ok(FlowOutcome {
            flow_id,
            handler,
            result,
            entry,
        })
    }

    pub fn in_progress(&self) -> usize {
        self.progress.len()
    }
}
