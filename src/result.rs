//! Per-package extraction result: components, their GCID hash chains, and
//! accumulated hints.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::backends::Package;
use crate::hints::{Hint, HintSeverity};
use crate::model::Component;
use crate::utils::{HashChain, build_gcid};

/// Synthetic component-id for hints that concern the package as a whole.
pub const GENERAL_ID: &str = "general";

#[derive(Debug, Serialize)]
pub struct PackageHints<'a> {
    pub package: &'a str,
    pub hints: &'a BTreeMap<String, Vec<Hint>>,
}

pub struct GeneratorResult {
    pkg: Arc<dyn Package>,
    pkid: String,
    cpts: BTreeMap<String, Component>,
    chains: HashMap<String, HashChain>,
    hints: BTreeMap<String, Vec<Hint>>,
    dropped: HashSet<String>,
}

impl GeneratorResult {
    pub fn new(pkg: Arc<dyn Package>) -> Self {
        let pkid = pkg.id();
        Self {
            pkg,
            pkid,
            cpts: BTreeMap::new(),
            chains: HashMap::new(),
            hints: BTreeMap::new(),
            dropped: HashSet::new(),
        }
    }

    pub fn pkid(&self) -> &str {
        &self.pkid
    }

    pub fn pkg(&self) -> &Arc<dyn Package> {
        &self.pkg
    }

    /// Registers a component, seeding its GCID hash chain with the given
    /// data (usually the raw metainfo bytes).
    pub fn add_component(&mut self, cpt: Component, seed: &[u8]) {
        let cid = cpt.cid.clone();
        let mut chain = HashChain::new();
        chain.update(seed);
        self.chains.insert(cid.clone(), chain);
        self.cpts.insert(cid, cpt);
    }

    /// Mixes additional data into a component's GCID. Every byte that
    /// influences the produced metadata must pass through here so cache
    /// keys advance with the content.
    pub fn update_component_gcid(&mut self, cid: &str, data: &[u8]) {
        if let Some(chain) = self.chains.get_mut(cid) {
            chain.update(data);
        }
    }

    /// The global component id for a registered component.
    pub fn gcid_for_component(&self, cid: &str) -> Option<String> {
        let chain = self.chains.get(cid)?;
        if chain.is_empty() {
            return None;
        }
        Some(build_gcid(cid, &chain.hexdigest()))
    }

    pub fn get_component(&self, cid: &str) -> Option<&Component> {
        self.cpts.get(cid)
    }

    pub fn get_component_mut(&mut self, cid: &str) -> Option<&mut Component> {
        self.cpts.get_mut(cid)
    }

    /// Component ids currently alive, in deterministic order.
    pub fn component_ids(&self) -> Vec<String> {
        self.cpts.keys().cloned().collect()
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.cpts.values()
    }

    pub fn components_count(&self) -> usize {
        self.cpts.len()
    }

    pub fn hints_count(&self) -> usize {
        self.hints.values().map(Vec::len).sum()
    }

    pub fn remove_component(&mut self, cid: &str) {
        self.cpts.remove(cid);
        self.chains.remove(cid);
    }

    /// Whether the component was discarded by an error hint.
    pub fn is_dropped(&self, cid: &str) -> bool {
        self.dropped.contains(cid)
    }

    /// Attaches a hint to a component (or to [`GENERAL_ID`]).
    ///
    /// Returns whether the component is still part of the result: an
    /// error-severity hint drops it immediately, and further hints on a
    /// dropped cid keep accumulating without reviving it.
    pub fn add_hint(&mut self, cid: &str, hint: Hint) -> bool {
        let severity = hint.severity();
        tracing::debug!(
            "hint for {} ({}): {} [{}]",
            self.pkid,
            cid,
            hint.tag,
            severity.as_str()
        );
        self.hints.entry(cid.to_string()).or_default().push(hint);
        if severity == HintSeverity::Error && cid != GENERAL_ID {
            self.cpts.remove(cid);
            self.dropped.insert(cid.to_string());
        }
        !self.is_dropped(cid)
    }

    /// A unit is ignored when extraction yielded neither components nor
    /// diagnostics; the datastore records it as "ignore".
    pub fn unit_ignored(&self) -> bool {
        self.cpts.is_empty() && self.hints.is_empty()
    }

    /// All hints as the per-package JSON object used by the hints report.
    pub fn hints_json(&self) -> Result<Option<String>> {
        if self.hints.is_empty() {
            return Ok(None);
        }
        let obj = PackageHints {
            package: &self.pkid,
            hints: &self.hints,
        };
        Ok(Some(serde_json::to_string(&obj)?))
    }

    pub fn hint_map(&self) -> &BTreeMap<String, Vec<Hint>> {
        &self.hints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::dummy::FakePackage;
    use crate::model::ComponentKind;

    fn make_result() -> GeneratorResult {
        GeneratorResult::new(Arc::new(FakePackage::new("foo", "1.0", "amd64")))
    }

    #[test]
    fn test_gcid_changes_with_version() {
        let mut res = make_result();
        res.add_component(
            Component::new(ComponentKind::DesktopApp, "org.example.Foo"),
            b"<component/>",
        );
        let gcid1 = res.gcid_for_component("org.example.Foo").unwrap();
        assert!(gcid1.starts_with("org/example/Foo/"));

        res.update_component_gcid("org.example.Foo", b"1.1");
        let gcid2 = res.gcid_for_component("org.example.Foo").unwrap();
        assert_ne!(gcid1, gcid2);
        assert!(gcid2.starts_with("org/example/Foo/"));
    }

    #[test]
    fn test_error_hint_drops_component() {
        let mut res = make_result();
        res.add_component(
            Component::new(ComponentKind::DesktopApp, "org.example.Foo"),
            b"seed",
        );
        assert!(res.add_hint(
            "org.example.Foo",
            Hint::new("missing-launchable-desktop-file")
        ));
        assert_eq!(res.components_count(), 1);

        assert!(!res.add_hint("org.example.Foo", Hint::new("missing-desktop-file")));
        assert_eq!(res.components_count(), 0);
        assert!(res.is_dropped("org.example.Foo"));

        // Further hints accumulate but never revive the component.
        assert!(!res.add_hint("org.example.Foo", Hint::new("description-missing")));
        assert_eq!(res.components_count(), 0);
        assert_eq!(res.hints_count(), 3);
    }

    #[test]
    fn test_general_hints_never_drop() {
        let mut res = make_result();
        assert!(res.add_hint(GENERAL_ID, Hint::new("internal-error")));
        assert!(!res.unit_ignored());
    }

    #[test]
    fn test_unit_ignored() {
        let res = make_result();
        assert!(res.unit_ignored());
    }

    #[test]
    fn test_hints_json_shape() {
        let mut res = make_result();
        res.add_hint(
            GENERAL_ID,
            Hint::with_vars("pkg-extract-error", &[("fname", "x"), ("msg", "oops")]),
        );
        let json = res.hints_json().unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["package"], "foo/1.0/amd64");
        assert_eq!(value["hints"]["general"][0]["tag"], "pkg-extract-error");
        assert_eq!(value["hints"]["general"][0]["vars"]["msg"], "oops");
    }
}
