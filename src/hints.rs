//! Registry of issue-hint tags known to this generator.
//!
//! Hints are the authoritative diagnostics channel: everything that goes
//! wrong for a package or component ends up as a tagged hint in the
//! exported report. Tags and their severities are defined in an embedded
//! JSON document and may be extended at startup (e.g. with validator tags).

use std::collections::BTreeMap;
use std::fs;
use std::sync::{OnceLock, RwLock};

use anyhow::{Context, Result};
use camino::Utf8Path;
use serde::{Deserialize, Serialize};

const HINT_DEFINITIONS: &str = include_str!("../data/hint-definitions.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HintSeverity {
    Pedantic,
    Info,
    Warning,
    Error,
}

impl HintSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            HintSeverity::Pedantic => "pedantic",
            HintSeverity::Info => "info",
            HintSeverity::Warning => "warning",
            HintSeverity::Error => "error",
        }
    }
}

/// Definition of a hint tag: template text, severity and whether the tag
/// reports an internal generator problem rather than a packaging problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HintDefinition {
    pub tag: String,
    pub severity: HintSeverity,
    #[serde(default)]
    pub internal: bool,
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct HintDefinitionFile {
    hints: Vec<HintDefinition>,
}

/// One emitted hint: a tag plus template variables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hint {
    pub tag: String,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

impl Hint {
    pub fn new<S: Into<String>>(tag: S) -> Self {
        Self {
            tag: tag.into(),
            vars: BTreeMap::new(),
        }
    }

    pub fn with_vars<S: Into<String>>(tag: S, vars: &[(&str, &str)]) -> Self {
        Self {
            tag: tag.into(),
            vars: vars
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn severity(&self) -> HintSeverity {
        severity_of(&self.tag)
    }
}

fn registry() -> &'static RwLock<BTreeMap<String, HintDefinition>> {
    static REGISTRY: OnceLock<RwLock<BTreeMap<String, HintDefinition>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let defs: HintDefinitionFile =
            serde_json::from_str(HINT_DEFINITIONS).expect("embedded hint definitions are valid");
        RwLock::new(
            defs.hints
                .into_iter()
                .map(|d| (d.tag.clone(), d))
                .collect(),
        )
    })
}

/// Registers an additional tag, e.g. one forwarded from the metainfo
/// validator. Existing definitions win.
pub fn register_tag(def: HintDefinition) {
    let mut reg = registry().write().expect("hint registry lock poisoned");
    reg.entry(def.tag.clone()).or_insert(def);
}

pub fn is_known_tag(tag: &str) -> bool {
    registry()
        .read()
        .expect("hint registry lock poisoned")
        .contains_key(tag)
}

/// Severity for a tag. Unknown tags are escalated to the severity of
/// `internal-unknown-tag` (an error) and logged once per call site.
pub fn severity_of(tag: &str) -> HintSeverity {
    let reg = registry().read().expect("hint registry lock poisoned");
    match reg.get(tag) {
        Some(def) => def.severity,
        None => {
            tracing::warn!("hint tag '{}' is not registered", tag);
            reg.get("internal-unknown-tag")
                .map(|d| d.severity)
                .unwrap_or(HintSeverity::Error)
        }
    }
}

pub fn explanation_template_of(tag: &str) -> Option<String> {
    registry()
        .read()
        .expect("hint registry lock poisoned")
        .get(tag)
        .map(|d| d.text.clone())
}

/// Serializes the full registry to a JSON file for external consumers of
/// the hints report.
pub fn save_registry(path: &Utf8Path) -> Result<()> {
    let reg = registry().read().expect("hint registry lock poisoned");
    let defs: Vec<&HintDefinition> = reg.values().collect();
    let data = serde_json::to_string_pretty(&serde_json::json!({ "hints": defs }))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, data).with_context(|| format!("write hint definitions to {}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_definitions_load() {
        assert!(is_known_tag("metainfo-parsing-error"));
        assert_eq!(severity_of("metainfo-parsing-error"), HintSeverity::Error);
        assert_eq!(
            severity_of("missing-launchable-desktop-file"),
            HintSeverity::Warning
        );
        assert_eq!(severity_of("description-missing"), HintSeverity::Pedantic);
    }

    #[test]
    fn test_unknown_tag_is_error() {
        assert_eq!(severity_of("definitely-not-a-tag"), HintSeverity::Error);
    }

    #[test]
    fn test_severity_order() {
        assert!(HintSeverity::Pedantic < HintSeverity::Info);
        assert!(HintSeverity::Info < HintSeverity::Warning);
        assert!(HintSeverity::Warning < HintSeverity::Error);
    }

    #[test]
    fn test_register_tag_keeps_existing() {
        register_tag(HintDefinition {
            tag: "asv-test-tag".into(),
            severity: HintSeverity::Info,
            internal: false,
            text: "validator says: {{msg}}".into(),
        });
        assert!(is_known_tag("asv-test-tag"));
        // Second registration with a different severity must not override.
        register_tag(HintDefinition {
            tag: "asv-test-tag".into(),
            severity: HintSeverity::Error,
            internal: false,
            text: "other".into(),
        });
        assert_eq!(severity_of("asv-test-tag"), HintSeverity::Info);
    }

    #[test]
    fn test_hint_vars() {
        let h = Hint::with_vars("icon-not-found", &[("icon_name", "foo")]);
        assert_eq!(h.vars.get("icon_name").unwrap(), "foo");
        assert_eq!(h.severity(), HintSeverity::Error);
    }
}
