//! File, input and environment kinds.

use std::path::Path;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use weft_core::error::{Result, WeftError};
use weft_core::state::State;
use weft_core::traits::{NodeContext, NodeKind};
use weft_engine::graph::options_map;

use super::{json_field, parse_json};

/// How an output kind opens its file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteMode {
    #[default]
    #[serde(rename = "w")]
    Write,
    #[serde(rename = "a")]
    Append,
}

async fn write_file(label: &str, path: &Path, mode: WriteMode, data: &str) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(mode == WriteMode::Append)
        .truncate(mode == WriteMode::Write)
        .open(path)
        .await
        .map_err(|e| WeftError::node(label, format!("cannot open {}: {e}", path.display())))?;
    file.write_all(data.as_bytes()).await?;
    file.flush().await?;
    debug!(node = %label, path = %path.display(), bytes = data.len(), "Wrote file");
    Ok(())
}

async fn read_file(label: &str, path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| WeftError::node(label, format!("cannot read {}: {e}", path.display())))
}

// ── Input ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InputOptions {
    pub value: String,
}

/// Supplies user input. The configured value wins; when empty, the
/// working result passes through (as supplied with `weft run --input`).
pub struct InputKind {
    options: InputOptions,
}

impl InputKind {
    pub fn new(options: InputOptions) -> Self {
        Self { options }
    }
}

impl NodeKind for InputKind {
    fn kind(&self) -> &'static str {
        "InputNode"
    }

    fn run<'a>(&'a self, _ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            if self.options.value.is_empty() {
                Ok(Some(state.result.clone()))
            } else {
                Ok(Some(self.options.value.clone()))
            }
        })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileInputOptions {
    pub filename: String,
}

pub struct FileInputKind {
    options: FileInputOptions,
}

impl FileInputKind {
    pub fn new(options: FileInputOptions) -> Self {
        Self { options }
    }
}

impl NodeKind for FileInputKind {
    fn kind(&self) -> &'static str {
        "FileInput"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, _state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move { Ok(Some(read_file(ctx.label, Path::new(&self.options.filename)).await?)) })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonFileInputOptions {
    pub filename_key: String,
}

impl Default for JsonFileInputOptions {
    fn default() -> Self {
        Self {
            filename_key: "filename".to_string(),
        }
    }
}

/// Reads the file named under `filename_key` of a JSON result.
pub struct JsonFileInputKind {
    options: JsonFileInputOptions,
}

impl JsonFileInputKind {
    pub fn new(options: JsonFileInputOptions) -> Self {
        Self { options }
    }
}

impl NodeKind for JsonFileInputKind {
    fn kind(&self) -> &'static str {
        "JSONFileInput"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let data = parse_json(ctx.label, &state.result)?;
            let filename = json_field(ctx.label, &data, &self.options.filename_key)?;
            Ok(Some(read_file(ctx.label, Path::new(&filename)).await?))
        })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

// ── Output ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileOutputOptions {
    pub filename: String,
    pub mode: WriteMode,
}

/// Writes the working result to a file and passes it on.
pub struct FileOutputKind {
    options: FileOutputOptions,
}

impl FileOutputKind {
    pub fn new(options: FileOutputOptions) -> Self {
        Self { options }
    }
}

impl NodeKind for FileOutputKind {
    fn kind(&self) -> &'static str {
        "FileOutput"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let path = Path::new(&self.options.filename);
            write_file(ctx.label, path, self.options.mode, &state.result).await?;
            Ok(Some(state.result.clone()))
        })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonFileOutputOptions {
    pub filename_key: String,
    pub data_key: String,
    pub mode: WriteMode,
}

impl Default for JsonFileOutputOptions {
    fn default() -> Self {
        Self {
            filename_key: "filename".to_string(),
            data_key: "data".to_string(),
            mode: WriteMode::Write,
        }
    }
}

/// Writes `data[data_key]` to the file named by `data[filename_key]`.
pub struct JsonFileOutputKind {
    options: JsonFileOutputOptions,
}

impl JsonFileOutputKind {
    pub fn new(options: JsonFileOutputOptions) -> Self {
        Self { options }
    }
}

impl NodeKind for JsonFileOutputKind {
    fn kind(&self) -> &'static str {
        "JSONFileOutput"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let data = parse_json(ctx.label, &state.result)?;
            let filename = json_field(ctx.label, &data, &self.options.filename_key)?;
            let body = json_field(ctx.label, &data, &self.options.data_key)?;
            write_file(ctx.label, Path::new(&filename), self.options.mode, &body).await?;
            Ok(Some(state.result.clone()))
        })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

// ── Environment ─────────────────────────────────────────────────

/// Parse `.env`-style text into key/value pairs. Blank lines, comments
/// and lines without `=` are skipped; `export ` prefixes and matching
/// quotes are stripped.
fn parse_env(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            let value = value.trim();
            let value = ['"', '\'']
                .iter()
                .find_map(|q| value.strip_prefix(*q).and_then(|v| v.strip_suffix(*q)))
                .unwrap_or(value);
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvOptions {
    pub filename: String,
}

impl Default for EnvOptions {
    fn default() -> Self {
        Self {
            filename: ".env".to_string(),
        }
    }
}

/// Loads a `.env` file into the process environment. Variables that are
/// already set keep their values.
pub struct EnvKind {
    options: EnvOptions,
}

impl EnvKind {
    pub fn new(options: EnvOptions) -> Self {
        Self { options }
    }
}

impl NodeKind for EnvKind {
    fn kind(&self) -> &'static str {
        "EnvNode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let text = read_file(ctx.label, Path::new(&self.options.filename)).await?;
            let mut loaded = 0;
            for (key, value) in parse_env(&text) {
                if std::env::var_os(&key).is_none() {
                    std::env::set_var(&key, value);
                    loaded += 1;
                }
            }
            info!(node = %ctx.label, file = %self.options.filename, loaded, "Loaded environment");
            Ok(Some(state.result.clone()))
        })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManualEnvOptions {
    pub key: String,
    pub val: String,
}

pub struct ManualEnvKind {
    options: ManualEnvOptions,
}

impl ManualEnvKind {
    pub fn new(options: ManualEnvOptions) -> Self {
        Self { options }
    }
}

impl NodeKind for ManualEnvKind {
    fn kind(&self) -> &'static str {
        "ManualEnvNode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let key = self.options.key.trim();
            if key.is_empty() || key.contains('=') {
                return Err(WeftError::node(ctx.label, format!("invalid variable name `{key}`")));
            }
            std::env::set_var(key, &self.options.val);
            Ok(Some(state.result.clone()))
        })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_test_utils::run_kind;

    #[test]
    fn test_write_mode_serde() {
        let opts: FileOutputOptions = serde_json::from_value(serde_json::json!({"filename": "o.txt", "mode": "a"})).unwrap();
        assert_eq!(opts.mode, WriteMode::Append);
        let defaults: FileOutputOptions = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(defaults.mode, WriteMode::Write);
        assert_eq!(options_map(&defaults)["mode"], "w");
    }

    #[tokio::test]
    async fn test_input_value_or_passthrough() {
        let fixed = InputKind::new(InputOptions { value: "typed".into() });
        let mut state = State::with_result("prev");
        assert_eq!(run_kind(&fixed, "In", &mut state).await.unwrap().as_deref(), Some("typed"));

        let passthrough = InputKind::new(InputOptions::default());
        assert_eq!(run_kind(&passthrough, "In", &mut state).await.unwrap().as_deref(), Some("prev"));
    }

    #[tokio::test]
    async fn test_file_output_write_then_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let filename = path.to_string_lossy().to_string();

        let write = FileOutputKind::new(FileOutputOptions {
            filename: filename.clone(),
            mode: WriteMode::Write,
        });
        let append = FileOutputKind::new(FileOutputOptions {
            filename,
            mode: WriteMode::Append,
        });

        let mut state = State::with_result("one");
        run_kind(&write, "Out", &mut state).await.unwrap();
        run_kind(&write, "Out", &mut state).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one");

        state.result = "two".into();
        let out = run_kind(&append, "Out", &mut state).await.unwrap();
        assert_eq!(out.as_deref(), Some("two"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "onetwo");
    }

    #[tokio::test]
    async fn test_json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        let payload = serde_json::json!({"filename": path.to_string_lossy(), "data": "saved"}).to_string();

        let output = JsonFileOutputKind::new(JsonFileOutputOptions::default());
        let mut state = State::with_result(payload.clone());
        run_kind(&output, "JOut", &mut state).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "saved");

        let input = JsonFileInputKind::new(JsonFileInputOptions::default());
        let out = run_kind(&input, "JIn", &mut state).await.unwrap();
        assert_eq!(out.as_deref(), Some("saved"));
    }

    #[tokio::test]
    async fn test_file_input_missing_file() {
        let kind = FileInputKind::new(FileInputOptions {
            filename: "/nonexistent/weft/input.txt".into(),
        });
        let err = run_kind(&kind, "In", &mut State::new()).await.unwrap_err();
        assert!(err.to_string().starts_with("In: cannot read"));
    }

    #[test]
    fn test_parse_env() {
        let parsed = parse_env("# comment\nA=1\nexport B = \"two\"\n\nnot a pair\nC='x=y'\n=bad\n");
        assert_eq!(
            parsed,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "two".to_string()),
                ("C".to_string(), "x=y".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_env_file_keeps_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "WEFT_TEST_ENV_NEW=fresh\nWEFT_TEST_ENV_KEEP=overwritten\n").unwrap();
        std::env::set_var("WEFT_TEST_ENV_KEEP", "original");

        let kind = EnvKind::new(EnvOptions {
            filename: path.to_string_lossy().to_string(),
        });
        let mut state = State::with_result("r");
        assert_eq!(run_kind(&kind, "Env", &mut state).await.unwrap().as_deref(), Some("r"));
        assert_eq!(std::env::var("WEFT_TEST_ENV_NEW").unwrap(), "fresh");
        assert_eq!(std::env::var("WEFT_TEST_ENV_KEEP").unwrap(), "original");
    }

    #[tokio::test]
    async fn test_manual_env() {
        let kind = ManualEnvKind::new(ManualEnvOptions {
            key: "WEFT_TEST_MANUAL".into(),
            val: "set".into(),
        });
        run_kind(&kind, "Env", &mut State::new()).await.unwrap();
        assert_eq!(std::env::var("WEFT_TEST_MANUAL").unwrap(), "set");

        let bad = ManualEnvKind::new(ManualEnvOptions::default());
        assert!(run_kind(&bad, "Env", &mut State::new()).await.is_err());
    }
}
