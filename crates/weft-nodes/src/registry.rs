use std::sync::Arc;

use weft_engine::graph::NodeRegistry;

use crate::kinds::audio::{ElevenLabsKind, WhispersKind};
use crate::kinds::database::SqliteQueryKind;
use crate::kinds::embedding::{EmbeddingInKind, EmbeddingQueryKind, EmbeddingsIngestKind};
use crate::kinds::history::{
    DynamicWindowedHistoryKind, HistoryKind, ManualHistoryKind, WindowedHistoryKind,
};
use crate::kinds::http::{HttpKind, JsonRequestKind, ScrapeKind, SerpApiKind};
use crate::kinds::image::DallEKind;
use crate::kinds::io::{
    EnvKind, FileInputKind, FileOutputKind, InputKind, JsonFileInputKind, JsonFileOutputKind,
    ManualEnvKind,
};
use crate::kinds::llm::LlmKind;
use crate::kinds::server::ServerInputKind;
use crate::kinds::testing::{AssertKind, LoggingKind};
use crate::kinds::text::{
    DateKind, DummyKind, FuncKind, JsonKind, JsonerizerKind, PromptKind, RandomKind, RegexKind,
    TagKind,
};
use crate::services::{Provider, Services};

/// Registry with Start/Init and every built-in kind. Kinds that need a
/// collaborator share `services`.
pub fn builtin_registry(services: Arc<Services>) -> NodeRegistry {
    let mut registry = NodeRegistry::new();

    // ── Text ────────────────────────────────────────────────────
    registry.register("PromptNode", |r| Ok(Box::new(PromptKind::from_record(r)?)));
    registry.register("FuncNode", |r| Ok(Box::new(FuncKind::from_record(r)?)));
    registry.register("DummyNode", |r| Ok(Box::new(DummyKind::new(r.options()?))));
    registry.register("RegexNode", |r| Ok(Box::new(RegexKind::new(r.options()?))));
    registry.register("TagNode", |r| Ok(Box::new(TagKind::new(r.options()?))));
    registry.register("JsonNode", |r| Ok(Box::new(JsonKind::new(r.options()?))));
    registry.register("JsonerizerNode", |r| Ok(Box::new(JsonerizerKind::new(r.options()?))));
    registry.register("RandomNode", |r| Ok(Box::new(RandomKind::new(r.options()?))));
    registry.register("DateNode", |r| Ok(Box::new(DateKind::new(r.options()?))));

    // ── Input / output ──────────────────────────────────────────
    registry.register("InputNode", |r| Ok(Box::new(InputKind::new(r.options()?))));
    registry.register_with_assets("FileInput", &["filename"], |r| {
        Ok(Box::new(FileInputKind::new(r.options()?)))
    });
    registry.register("JSONFileInput", |r| Ok(Box::new(JsonFileInputKind::new(r.options()?))));
    registry.register("FileOutput", |r| Ok(Box::new(FileOutputKind::new(r.options()?))));
    registry.register("JSONFileOutput", |r| Ok(Box::new(JsonFileOutputKind::new(r.options()?))));
    registry.register("EnvNode", |r| Ok(Box::new(EnvKind::new(r.options()?))));
    registry.register("ManualEnvNode", |r| Ok(Box::new(ManualEnvKind::new(r.options()?))));
    registry.register("ServerInputNode", |r| Ok(Box::new(ServerInputKind::new(r.options()?))));

    // ── LLM ─────────────────────────────────────────────────────
    let s = services.clone();
    registry.register("OpenAINode", move |r| {
        Ok(Box::new(LlmKind::new(Provider::OpenAi, r.options()?, s.clone())))
    });
    let s = services.clone();
    registry.register("ClaudeNode", move |r| {
        Ok(Box::new(LlmKind::new(Provider::Anthropic, r.options()?, s.clone())))
    });

    // ── History ─────────────────────────────────────────────────
    registry.register("HistoryNode", |r| Ok(Box::new(HistoryKind::new(r.options()?))));
    registry.register("WindowedHistoryNode", |r| {
        Ok(Box::new(WindowedHistoryKind::new(r.options()?)))
    });
    registry.register("DynamicWindowedHistoryNode", |r| {
        Ok(Box::new(DynamicWindowedHistoryKind::new(r.options()?)))
    });
    registry.register("ManualHistoryNode", |r| Ok(Box::new(ManualHistoryKind::new(r.options()?))));

    // ── Storage ─────────────────────────────────────────────────
    let db = services.db.clone();
    registry.register("SQLiteQueryNode", move |r| Ok(Box::new(SqliteQueryKind::from_record(r, db.clone())?)));
    let s = services.clone();
    registry.register_with_assets("EmbeddingsIngestNode", &["filename", "label_file"], move |r| {
        Ok(Box::new(EmbeddingsIngestKind::new(r.options()?, s.clone())))
    });
    let s = services.clone();
    registry.register("EmbeddingInNode", move |r| {
        Ok(Box::new(EmbeddingInKind::new(r.options()?, s.clone())))
    });
    let s = services.clone();
    registry.register("EmbeddingQueryNode", move |r| {
        Ok(Box::new(EmbeddingQueryKind::new(r.options()?, s.clone())))
    });

    // ── Network ─────────────────────────────────────────────────
    registry.register("HttpNode", |r| Ok(Box::new(HttpKind::new(r.options()?))));
    registry.register("JSONRequestNode", |r| Ok(Box::new(JsonRequestKind::new(r.options()?))));
    registry.register("ScrapeNode", |r| Ok(Box::new(ScrapeKind::new(r.options()?))));
    registry.register("SerpApiNode", |r| Ok(Box::new(SerpApiKind::new(r.options()?))));

    // ── Testing ─────────────────────────────────────────────────
    registry.register("AssertNode", |r| Ok(Box::new(AssertKind::from_record(r)?)));
    registry.register("LoggingNode", |_| Ok(Box::new(LoggingKind)));

    // ── Audio / image ───────────────────────────────────────────
    let s = services.clone();
    registry.register_with_assets("WhispersNode", &["filename"], move |r| {
        Ok(Box::new(WhispersKind::new(r.options()?, s.clone())))
    });
    registry.register("ElevenLabsNode", |r| Ok(Box::new(ElevenLabsKind::new(r.options()?))));
    registry.register("DallENode", move |r| {
        Ok(Box::new(DallEKind::new(r.options()?, services.clone())))
    });

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_builds_with_defaults() {
        let registry = builtin_registry(Arc::new(Services::default()));
        let kinds: Vec<String> = registry.kinds().iter().map(|k| k.to_string()).collect();
        assert_eq!(kinds.len(), 38);
        for kind in &kinds {
            let node = registry.create(kind, kind, 0.0, 0.0).unwrap();
            assert_eq!(node.kind(), kind.as_str());
            // Saved options rebuild the same kind
            let again = registry.deserialize(&node.to_record()).unwrap();
            assert_eq!(again.to_record(), node.to_record());
        }
    }

    #[test]
    fn test_asset_fields_declared() {
        let registry = builtin_registry(Arc::new(Services::default()));
        assert_eq!(registry.asset_fields("EmbeddingsIngestNode"), ["filename", "label_file"]);
        assert_eq!(registry.asset_fields("WhispersNode"), ["filename"]);
        assert!(registry.asset_fields("PromptNode").is_empty());
    }

    #[test]
    fn test_bad_options_are_malformed() {
        let registry = builtin_registry(Arc::new(Services::default()));
        let record = weft_engine::NodeRecord::new("RandomNode", "R", 0.0, 0.0).with_field("min", "low");
        assert!(matches!(
            registry.deserialize(&record),
            Err(weft_core::error::WeftError::MalformedFile(_))
        ));
    }
}
