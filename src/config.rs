//! Runtime configuration.
//!
//! Log verbosity is not configured here; it comes from `RUST_LOG` (see
//! [`setup_tracing`](crate::lifecycle::setup_tracing)).

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::NameStyle;

pub const NAME_STYLE_VAR: &str = "USER_MIDDLEWARE_NAME_STYLE";
pub const GATEWAY_BUFFER_VAR: &str = "USER_MIDDLEWARE_GATEWAY_BUFFER";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiddlewareConfig {
    /// How display names are built for create payloads.
    pub name_style: NameStyle,
    /// Mailbox size of the in-memory gateway actor.
    pub gateway_buffer: usize,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            name_style: NameStyle::Spaced,
            gateway_buffer: 32,
        }
    }
}

impl MiddlewareConfig {
    /// Reads overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from `lookup`, keeping the default for any variable
    /// that is absent or unparsable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(NAME_STYLE_VAR) {
            match raw.parse() {
                Ok(style) => config.name_style = style,
                Err(e) => warn!(var = NAME_STYLE_VAR, error = %e, "Ignoring invalid value"),
            }
        }

        if let Some(raw) = lookup(GATEWAY_BUFFER_VAR) {
            match raw.trim().parse::<usize>() {
                Ok(size) if size > 0 => config.gateway_buffer = size,
                Ok(_) => warn!(var = GATEWAY_BUFFER_VAR, "Ignoring zero buffer size"),
                Err(e) => warn!(var = GATEWAY_BUFFER_VAR, error = %e, "Ignoring invalid value"),
            }
        }

        config
    }
}
