//! Prompt template formatting.
//!
//! Templates use single-brace placeholders rendered by minijinja against a
//! `state` object:
//! - `{state}` / `{state.result}`: the working result
//! - `{state[Label]}` / `{state["Label"]}`: a node's latest output
//! - `{{` / `}}`: literal braces
//!
//! Any minijinja expression is accepted inside the braces, so filters such
//! as `{state.result | upper}` work too. Undefined values are errors.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use minijinja::syntax::SyntaxConfig;
use minijinja::value::{Enumerator, Object, ObjectRepr, Value};
use minijinja::{context, Environment, UndefinedBehavior};
use regex::Regex;

use crate::error::{Result, WeftError};
use crate::state::State;

const OPEN_BRACE: &str = "{% raw %}{{% endraw %}";
const CLOSE_BRACE: &str = "{% raw %}}{% endraw %}";

/// The `state` value seen by templates. Rendering it directly prints the
/// working result. `result` is reserved for the working result, every
/// other key looks up a node output.
#[derive(Debug)]
struct StateView {
    result: String,
    variables: HashMap<String, String>,
    /// First key that was looked up and not found.
    missing: OnceLock<String>,
}

impl Object for StateView {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Map
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let key = key.as_str()?;
        if key == "result" {
            return Some(Value::from(self.result.as_str()));
        }
        match self.variables.get(key) {
            Some(value) => Some(Value::from(value.as_str())),
            None => {
                let _ = self.missing.set(key.to_string());
                None
            }
        }
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Values(self.variables.keys().map(|k| Value::from(k.as_str())).collect())
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result
    where
        Self: Sized + 'static,
    {
        f.write_str(&self.result)
    }
}

fn environment() -> Result<Environment<'static>> {
    let syntax = SyntaxConfig::builder()
        .variable_delimiters("{", "}")
        .block_delimiters("{%", "%}")
        .comment_delimiters("{#", "#}")
        .build()
        .map_err(|e| WeftError::Template(e.to_string()))?;

    let mut env = Environment::new();
    env.set_syntax(syntax);
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    Ok(env)
}

/// Rewrite doubled braces into raw blocks and quote bare `state[Label]`
/// keys, which may contain spaces. A lone `}` is rejected.
fn to_jinja(template: &str) -> Result<String> {
    let token = Regex::new(r"\{\{|\}\}|\{([^{}]*)\}|\}").map_err(|e| WeftError::Template(e.to_string()))?;
    let bare_key =
        Regex::new(r#"^\s*state\[([^\]"']+)\]\s*$"#).map_err(|e| WeftError::Template(e.to_string()))?;

    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in token.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&template[last..whole.start()]);
        last = whole.end();

        match (whole.as_str(), caps.get(1)) {
            ("{{", _) => out.push_str(OPEN_BRACE),
            ("}}", _) => out.push_str(CLOSE_BRACE),
            ("}", _) => return Err(WeftError::Template("single '}' encountered in template".into())),
            (_, Some(inner)) => match bare_key.captures(inner.as_str()).and_then(|c| c.get(1)) {
                Some(key) => {
                    let quoted = serde_json::to_string(key.as_str().trim())?;
                    out.push_str(&format!("{{state[{quoted}]}}"));
                }
                None => out.push_str(whole.as_str()),
            },
            _ => out.push_str(whole.as_str()),
        }
    }
    out.push_str(&template[last..]);
    Ok(out)
}

pub fn render(template: &str, state: &State) -> Result<String> {
    let source = to_jinja(template)?;
    let view = Arc::new(StateView {
        result: state.result.clone(),
        variables: state.variables.clone(),
        missing: OnceLock::new(),
    });

    let env = environment()?;
    env.render_str(&source, context! { state => Value::from_dyn_object(view.clone()) })
        .map_err(|e| match view.missing.get() {
            Some(key) => WeftError::Template(format!("no variable named `{key}`")),
            None => WeftError::Template(e.to_string()),
        })
}
