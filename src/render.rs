//! Configuration templates
//!
//! Templates are Jinja-syntax files under a fixed root. Rendering is strict:
//! a reference to an undefined parameter fails instead of rendering empty,
//! unless the template itself supplies a fallback (`is defined`, `default`).
//! No clock or environment access is registered, so identical inputs always
//! produce identical files.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use minijinja::{Environment, UndefinedBehavior, Value};
use serde::Serialize;

use crate::error::{HarnessError, HarnessResult};
use crate::workdir::WorkingDirectory;

/// Template variable under which the test context is injected.
pub const CONTEXT_KEY: &str = "harness";

/// Harness state visible to templates as `harness.*`.
#[derive(Debug, Clone, Serialize)]
pub struct HarnessContext {
    pub identity: String,
    pub working_dir: PathBuf,
    pub base_dir: PathBuf,
    /// Directory the analyzer should write its structured output into
    pub output_dir: PathBuf,
    pub analyzer_name: String,
}

impl HarnessContext {
    pub fn new(workdir: &WorkingDirectory, analyzer_name: &str) -> Self {
        Self {
            identity: workdir.identity().to_string(),
            working_dir: workdir.path().to_path_buf(),
            base_dir: workdir.base_dir().to_path_buf(),
            output_dir: workdir.join("output"),
            analyzer_name: analyzer_name.to_string(),
        }
    }
}

/// Named template parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateParams(BTreeMap<String, serde_json::Value>);

impl TemplateParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter (builder style).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.0.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<K: Into<String>, V: Into<serde_json::Value>> FromIterator<(K, V)> for TemplateParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Renders templates from a template root into working directories.
pub struct ConfigRenderer {
    env: Environment<'static>,
    template_dir: PathBuf,
}

impl ConfigRenderer {
    pub fn new(template_dir: impl Into<PathBuf>) -> Self {
        let template_dir = template_dir.into();
        let mut env = Environment::new();
        env.set_loader(minijinja::path_loader(template_dir.clone()));
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        Self { env, template_dir }
    }

    pub fn template_dir(&self) -> &Path {
        &self.template_dir
    }

    /// Render `template` into `output` inside the working directory.
    ///
    /// The context is injected as `harness` after the caller's parameters,
    /// so it cannot be shadowed. Returns the path of the written file.
    ///
    /// `output` must be relative and must not climb out with `..`.
    pub fn render(
        &self,
        workdir: &WorkingDirectory,
        context: &HarnessContext,
        template: &str,
        output: impl AsRef<Path>,
        params: &TemplateParams,
    ) -> HarnessResult<PathBuf> {
        let output = output.as_ref();
        check_output_path(output)?;
        let text = self.render_to_string(context, template, params)?;

        let path = workdir.join(output);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| HarnessError::fs("create", parent, e))?;
        }
        fs::write(&path, text).map_err(|e| HarnessError::fs("write", &path, e))?;
        tracing::debug!(template, path = %path.display(), "rendered config");
        Ok(path)
    }

    /// Render `template` without writing it anywhere.
    pub fn render_to_string(
        &self,
        context: &HarnessContext,
        template: &str,
        params: &TemplateParams,
    ) -> HarnessResult<String> {
        let tmpl = self.env.get_template(template)?;

        let mut vars: BTreeMap<&str, Value> = params
            .0
            .iter()
            .map(|(k, v)| (k.as_str(), Value::from_serialize(v)))
            .collect();
        vars.insert(CONTEXT_KEY, Value::from_serialize(context));

        Ok(tmpl.render(&vars)?)
    }
}

fn check_output_path(output: &Path) -> HarnessResult<()> {
    let mut has_name = false;
    for component in output.components() {
        match component {
            Component::Normal(_) => has_name = true,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(escaping_output(output));
            }
        }
    }
    if !has_name {
        return Err(escaping_output(output));
    }
    Ok(())
}

fn escaping_output(output: &Path) -> HarnessError {
    HarnessError::fs(
        "write",
        output,
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "rendered file must be a relative path inside the working directory",
        ),
    )
}
