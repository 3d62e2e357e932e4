//! Scenario document loading and schema validation.
//!
//! A scenario is an XML document with a fixed vocabulary. The loader parses
//! it, checks every element and attribute against the schema table below and
//! hands back an owned element tree; all further elaboration (parameter
//! substitution, imports, wiring) belongs to the compiler.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

/// Schema table: element name, required attributes, optional attributes,
/// permitted child elements.
const SCHEMA: &[(&str, &[&str], &[&str], &[&str])] = &[
    (
        "scenario",
        &["name"],
        &["description"],
        &["step", "group", "import", "parameters", "dependency"],
    ),
    (
        "step",
        &["name", "exec"],
        &["env", "cwd", "requires", "if", "unless", "delay"],
        &[],
    ),
    ("group", &["name"], &["requires"], &["step", "group"]),
    ("import", &["file"], &["namespace"], &["dependency"]),
    ("parameters", &[], &[], &["param"]),
    ("param", &["name", "value"], &[], &[]),
    ("dependency", &["step", "requires"], &[], &[]),
];

/// One element of the scenario document, detached from the parse buffer.
#[derive(Debug, Clone)]
pub struct ScenarioElement {
    pub tag: String,
    attrs: Vec<(String, String)>,
    pub children: Vec<ScenarioElement>,
}

impl ScenarioElement {
    /// Look up an attribute value.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate over direct children with the given tag.
    pub fn children_named<'a>(
        &'a self,
        tag: &'a str,
    ) -> impl Iterator<Item = &'a ScenarioElement> {
        self.children.iter().filter(move |c| c.tag == tag)
    }
}

/// A validated, re-usable test scenario.
#[derive(Debug, Clone)]
pub struct Scenario {
    name: String,
    description: String,
    root: ScenarioElement,
}

impl Scenario {
    /// Load and validate a scenario from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Unable to read scenario file {}", path.display()))?;
        Self::parse(&text)
            .with_context(|| format!("Unable to load scenario from {}", path.display()))
    }

    /// Parse and validate a scenario document.
    pub fn parse(text: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(text).context("Malformed XML")?;
        let root = doc.root_element();
        if root.tag_name().name() != "scenario" {
            bail!(
                "Root element must be <scenario>, found <{}>",
                root.tag_name().name()
            );
        }

        let tree = convert(&doc, root)?;
        let name = tree
            .attr("name")
            .expect("validated above")
            .to_string();
        let description = tree.attr("description").unwrap_or("").to_string();

        Ok(Self {
            name,
            description,
            root: tree,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The validated scenario definition tree.
    pub fn definition(&self) -> &ScenarioElement {
        &self.root
    }
}

/// Validate one element against the schema table and convert it, recursing
/// into children.
fn convert(doc: &roxmltree::Document, node: roxmltree::Node) -> Result<ScenarioElement> {
    let tag = node.tag_name().name().to_string();
    let pos = doc.text_pos_at(node.range().start);

    let (_, required, optional, child_tags) = SCHEMA
        .iter()
        .find(|(name, ..)| *name == tag)
        .ok_or_else(|| anyhow::anyhow!("Unknown element <{tag}> at line {}", pos.row))?;

    for attr in node.attributes() {
        let name = attr.name();
        if !required.contains(&name) && !optional.contains(&name) {
            bail!(
                "Element <{tag}> does not allow attribute '{name}' (line {})",
                pos.row
            );
        }
    }
    for name in *required {
        if node.attribute(*name).is_none() {
            bail!(
                "Element <{tag}> is missing required attribute '{name}' (line {})",
                pos.row
            );
        }
    }

    let mut children = Vec::new();
    for child in node.children() {
        if child.is_element() {
            let child_tag = child.tag_name().name();
            if !child_tags.contains(&child_tag) {
                let child_pos = doc.text_pos_at(child.range().start);
                bail!(
                    "Element <{tag}> does not allow child <{child_tag}> (line {})",
                    child_pos.row
                );
            }
            children.push(convert(doc, child)?);
        } else if child.is_text() {
            let text = child.text().unwrap_or("");
            if !text.trim().is_empty() {
                bail!("Element <{tag}> does not allow text content (line {})", pos.row);
            }
        }
    }

    let attrs = node
        .attributes()
        .map(|a| (a.name().to_string(), a.value().to_string()))
        .collect();

    Ok(ScenarioElement {
        tag,
        attrs,
        children,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_scenario() {
        let scenario = Scenario::parse(r#"<scenario name="smoke"/>"#).unwrap();
        assert_eq!(scenario.name(), "smoke");
        assert_eq!(scenario.description(), "");
    }

    #[test]
    fn test_steps_and_groups_round_trip() {
        let scenario = Scenario::parse(
            r#"<scenario name="s" description="demo">
                 <step name="a" exec="true"/>
                 <group name="g" requires="a">
                   <step name="g1" exec="true"/>
                 </group>
               </scenario>"#,
        )
        .unwrap();

        let def = scenario.definition();
        assert_eq!(def.children_named("step").count(), 1);
        let group = def.children_named("group").next().unwrap();
        assert_eq!(group.attr("requires"), Some("a"));
        assert_eq!(group.children_named("step").count(), 1);
    }

    #[test]
    fn test_missing_name_is_fatal() {
        let err = Scenario::parse(r#"<scenario description="x"/>"#)
            .unwrap_err()
            .to_string();
        assert!(err.contains("name"), "unexpected message: {err}");
    }

    #[test]
    fn test_unknown_attribute_is_fatal() {
        let err = Scenario::parse(r#"<scenario name="s"><step name="a" exec="true" bogus="1"/></scenario>"#)
            .unwrap_err()
            .to_string();
        assert!(err.contains("bogus"), "unexpected message: {err}");
    }

    #[test]
    fn test_unknown_element_is_fatal() {
        let result = Scenario::parse(r#"<scenario name="s"><widget/></scenario>"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_step_missing_exec_is_fatal() {
        let err = Scenario::parse(r#"<scenario name="s"><step name="a"/></scenario>"#)
            .unwrap_err()
            .to_string();
        assert!(err.contains("exec"), "unexpected message: {err}");
    }

    #[test]
    fn test_wrong_root_is_fatal() {
        assert!(Scenario::parse(r#"<plan name="s"/>"#).is_err());
    }
}
