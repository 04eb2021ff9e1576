//! Builds the optional services the CLI and HTTP server share.
use std::sync::Arc;

use anyhow::Result;
use codebox_core::api::{AppConfig, ErrorExplainer};

use crate::factory;

#[derive(Clone, Default)]
pub struct Services {
    pub explainer: Option<Arc<dyn ErrorExplainer>>,
}

impl Services {
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let explainer = factory::build_explainer(&cfg.explainer)?;
        if explainer.is_none() {
            tracing::debug!(target: "codebox.plugins", "explainer disabled");
        }
        Ok(Self { explainer })
    }
}
