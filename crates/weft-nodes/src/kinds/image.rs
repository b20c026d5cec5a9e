use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::info;

use weft_core::error::{Result, WeftError};
use weft_core::state::State;
use weft_core::traits::{NodeContext, NodeKind};
use weft_engine::graph::options_map;
use weft_llm::OpenAiClient;

use crate::services::{Provider, Services};

/// USD per image for `dall-e-2` at the sizes it accepts.
pub fn image_price(size: &str) -> Option<f64> {
    match size {
        "256x256" => Some(0.016),
        "512x512" => Some(0.018),
        "1024x1024" => Some(0.020),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DallEOptions {
    pub model: String,
    pub size: String,
}

impl Default for DallEOptions {
    fn default() -> Self {
        Self {
            model: "dall-e-2".to_string(),
            size: "512x512".to_string(),
        }
    }
}

/// Generates an image from the working result and outputs its URL.
pub struct DallEKind {
    options: DallEOptions,
    services: Arc<Services>,
}

impl DallEKind {
    pub fn new(options: DallEOptions, services: Arc<Services>) -> Self {
        Self { options, services }
    }
}

impl NodeKind for DallEKind {
    fn kind(&self) -> &'static str {
        "DallENode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let config = self
                .services
                .model_config(Provider::OpenAi, Some(&self.options.model), None, None);
            info!(node = %ctx.label, size = %self.options.size, "Generating image");
            let url = OpenAiClient::new()
                .generate_image(&config, &state.result, &self.options.size)
                .await?;
            Ok(Some(url))
        })
    }

    fn cost(&self, _state: &mut State) -> Result<f64> {
        image_price(&self.options.size)
            .ok_or_else(|| WeftError::MalformedFile(format!("unsupported image size `{}`", self.options.size)))
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}
