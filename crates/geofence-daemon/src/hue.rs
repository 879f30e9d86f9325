//! Philips Hue bridge light controller.
//!
//! Talks to the bridge's v1 REST API (`http://<bridge>/api/<username>/...`).
//! The bridge answers writes with HTTP 200 and a list of `success` or `error`
//! entries, so every response body is checked.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use geofence_core::{LightController, LightsConfig, SunsetProvider};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Group id that addresses every light on the bridge.
const ALL_LIGHTS_GROUP: &str = "0";

/// Errors talking to the Hue bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Bridge address or username missing from configuration.
    #[error("Hue bridge not configured: set lights.bridge_ip and lights.username")]
    NotConfigured,

    /// Transport or HTTP status failure.
    #[error("Hue bridge request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The bridge rejected the request.
    #[error("Hue bridge error at {address}: {description}")]
    Rejected {
        /// Resource the bridge complained about.
        address: String,
        /// Bridge error description.
        description: String,
    },

    /// No scene has the configured name.
    #[error("Hue scene not found: {0}")]
    SceneNotFound(String),
}

#[derive(Debug, Deserialize)]
struct Scene {
    name: String,
    #[serde(default)]
    group: Option<String>,
}

/// Collects `error` entries from a bridge write response.
fn bridge_errors(body: &Value) -> Vec<BridgeError> {
    body.as_array()
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.get("error"))
        .map(|error| BridgeError::Rejected {
            address: error
                .get("address")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            description: error
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        })
        .collect()
}

/// Turns lights on at arrival and everything off at departure.
pub struct HueController<S> {
    client: reqwest::Client,
    base_url: String,
    arrive_lights: Vec<String>,
    after_sunset_scene: Option<String>,
    brightness: u8,
    sun: Arc<S>,
}

impl<S: SunsetProvider> HueController<S> {
    /// Create a controller for the configured bridge.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotConfigured`] without a bridge address and
    /// username.
    pub fn new(config: &LightsConfig, sun: Arc<S>) -> Result<Self, BridgeError> {
        let (Some(bridge), Some(username)) = (&config.bridge_ip, &config.username) else {
            return Err(BridgeError::NotConfigured);
        };
        Self::with_base_url(format!("http://{bridge}/api/{username}"), config, sun)
    }

    /// Create a controller for an explicit API base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_base_url(
        base_url: impl Into<String>,
        config: &LightsConfig,
        sun: Arc<S>,
    ) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            arrive_lights: config.arrive_lights.clone(),
            after_sunset_scene: config.after_sunset_scene.clone(),
            brightness: config.brightness,
            sun,
        })
    }

    async fn put(&self, path: &str, body: Value) -> Result<(), BridgeError> {
        let response: Value = self
            .client
            .put(format!("{}{path}", self.base_url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match bridge_errors(&response).into_iter().next() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn activate_scene(&self, name: &str) -> Result<(), BridgeError> {
        let scenes: HashMap<String, Scene> = self
            .client
            .get(format!("{}/scenes", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let (id, scene) = scenes
            .iter()
            .find(|(_, scene)| scene.name == name)
            .ok_or_else(|| BridgeError::SceneNotFound(name.to_string()))?;
        let group = scene.group.as_deref().unwrap_or(ALL_LIGHTS_GROUP);

        tracing::info!(scene = name, id = %id, group, "Activating after-sunset scene");
        self.put(&format!("/groups/{group}/action"), json!({ "scene": id }))
            .await
    }
}

impl<S: SunsetProvider + 'static> LightController for HueController<S> {
    async fn on_arrive(&self) -> anyhow::Result<()> {
        let mut failed = 0;
        for light in &self.arrive_lights {
            let state = json!({ "on": true, "bri": self.brightness });
            if let Err(e) = self.put(&format!("/lights/{light}/state"), state).await {
                tracing::warn!(light = %light, error = %e, "Failed to switch light on");
                failed += 1;
            }
        }

        if let Some(scene) = &self.after_sunset_scene {
            if self.sun.is_past_sunset() {
                self.activate_scene(scene).await?;
            }
        }

        if failed > 0 {
            anyhow::bail!("{failed} of {} arrive lights failed", self.arrive_lights.len());
        }
        Ok(())
    }

    async fn on_depart(&self) -> anyhow::Result<()> {
        self.put(
            &format!("/groups/{ALL_LIGHTS_GROUP}/action"),
            json!({ "on": false }),
        )
        .await?;
        tracing::info!("All lights off");
        Ok(())
    }
}

/// Light controller used when no bridge is configured; only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyLights;

impl LightController for LogOnlyLights {
    async fn on_arrive(&self) -> anyhow::Result<()> {
        tracing::info!("Arrive action (no Hue bridge configured)");
        Ok(())
    }

    async fn on_depart(&self) -> anyhow::Result<()> {
        tracing::info!("Depart action (no Hue bridge configured)");
        Ok(())
    }
}

/// The light controller the daemon runs with.
pub enum Lights<S> {
    /// A real bridge.
    Hue(HueController<S>),
    /// Logging only.
    LogOnly(LogOnlyLights),
}

impl<S: SunsetProvider + 'static> Lights<S> {
    /// Use the bridge when configured, otherwise log only.
    ///
    /// # Errors
    ///
    /// Returns an error if the bridge client cannot be built.
    pub fn from_config(config: &LightsConfig, sun: Arc<S>) -> Result<Self, BridgeError> {
        match HueController::new(config, sun) {
            Ok(hue) => Ok(Self::Hue(hue)),
            Err(BridgeError::NotConfigured) => {
                tracing::warn!("No Hue bridge configured, light actions will only be logged");
                Ok(Self::LogOnly(LogOnlyLights))
            }
            Err(e) => Err(e),
        }
    }
}

impl<S: SunsetProvider + 'static> LightController for Lights<S> {
    async fn on_arrive(&self) -> anyhow::Result<()> {
        match self {
            Self::Hue(hue) => hue.on_arrive().await,
            Self::LogOnly(log) => log.on_arrive().await,
        }
    }

    async fn on_depart(&self) -> anyhow::Result<()> {
        match self {
            Self::Hue(hue) => hue.on_depart().await,
            Self::LogOnly(log) => log.on_depart().await,
        }
    }
}
