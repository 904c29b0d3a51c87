//! Device metadata parsed from the user agent, sent with recording sessions

use serde::{Deserialize, Serialize};
use woothee::parser::{Parser, WootheeResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub operating_system: Option<String>,
    pub operating_system_version: Option<String>,
    pub device_type: Option<String>,
}

impl DeviceInfo {
    /// Parse a user agent string into device metadata
    pub fn from_user_agent(user_agent: Option<&str>) -> Self {
        let Some(ua) = user_agent else {
            return Self::default();
        };

        if ua.trim().is_empty() {
            return Self::default();
        }

        let parser = Parser::new();
        match parser.parse(ua) {
            Some(result) => Self::from_woothee_result(&result),
            None => Self::default(),
        }
    }

    fn from_woothee_result(result: &WootheeResult) -> Self {
        Self {
            browser: Self::clean_name(result.name),
            browser_version: Self::clean_version(result.version),
            operating_system: Self::clean_name(result.os),
            operating_system_version: Self::clean_version(&result.os_version),
            device_type: Self::determine_device_type(result.category),
        }
    }

    fn clean_name(name: &str) -> Option<String> {
        if name.trim().is_empty() || name == "UNKNOWN" {
            None
        } else {
            Some(name.trim().to_string())
        }
    }

    fn clean_version(version: &str) -> Option<String> {
        if version.trim().is_empty() || version == "UNKNOWN" {
            None
        } else {
            Some(version.trim().to_string())
        }
    }

    fn determine_device_type(category: &str) -> Option<String> {
        match category {
            "pc" => Some("Desktop".to_string()),
            "smartphone" => Some("Mobile".to_string()),
            "mobilephone" => Some("Mobile".to_string()),
            "tablet" => Some("Tablet".to_string()),
            "appliance" => Some("Smart TV".to_string()),
            "crawler" => Some("Bot".to_string()),
            "misc" => Some("Other".to_string()),
            _ => None,
        }
    }
}
