//! Embed-tag configuration
//!
//! The browser bundle auto-initializes from attributes on its own script
//! tag (`data-site-id` and friends). The embedding layer collects those
//! attributes and hands them here; everything except the site id has a
//! default.

use std::collections::HashMap;

use thiserror::Error;

use opine_core::{HttpTransport, TransportError};

pub const DEFAULT_API_ENDPOINT: &str = "https://api.opine.dev/v1/behavior";

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("Missing required attribute '{0}'")]
    MissingAttribute(&'static str),

    #[error("Invalid value '{value}' for attribute '{attribute}'")]
    InvalidAttribute {
        attribute: &'static str,
        value: String,
    },
}

/// Configuration read from the embed script tag
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedOptions {
    pub site_id: String,
    pub api_endpoint: String,
    pub survey_id: i32,
    pub debug: bool,
}

impl EmbedOptions {
    /// Parse script-tag data attributes. `data-site-id` is required.
    pub fn from_attributes(attributes: &HashMap<String, String>) -> Result<Self, EmbedError> {
        let site_id = attributes
            .get("data-site-id")
            .filter(|value| !value.trim().is_empty())
            .ok_or(EmbedError::MissingAttribute("data-site-id"))?
            .trim()
            .to_string();

        let api_endpoint = attributes
            .get("data-api-endpoint")
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_ENDPOINT.to_string());

        let survey_id = match attributes.get("data-survey-id") {
            Some(value) => {
                value
                    .trim()
                    .parse()
                    .map_err(|_| EmbedError::InvalidAttribute {
                        attribute: "data-survey-id",
                        value: value.clone(),
                    })?
            }
            None => 0,
        };

        let debug = attributes
            .get("data-debug")
            .map(|value| value == "true" || value == "1")
            .unwrap_or(false);

        Ok(Self {
            site_id,
            api_endpoint,
            survey_id,
            debug,
        })
    }

    /// HTTP transport pointed at the configured endpoint.
    pub fn transport(&self) -> Result<HttpTransport, TransportError> {
        HttpTransport::new(&self.api_endpoint)
    }
}
