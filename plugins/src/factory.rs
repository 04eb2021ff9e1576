use std::sync::Arc;

use anyhow::Result;

use codebox_core::api::{ErrorExplainer, ExplainerConfig};

use crate::explainer::HttpExplainer;

pub fn build_explainer(cfg: &ExplainerConfig) -> Result<Option<Arc<dyn ErrorExplainer>>> {
    if !cfg.enabled {
        return Ok(None);
    }
    let explainer = HttpExplainer::new(cfg.endpoint.clone(), cfg.api_key.clone(), cfg.timeout_ms)?;
    Ok(Some(Arc::new(explainer)))
}
