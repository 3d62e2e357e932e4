//! Tests for scenario elaboration.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use super::*;
use crate::flow::NodeKind;

fn compile_str(xml: &str) -> Result<Compilation> {
    compile(&Scenario::parse(xml).unwrap(), Path::new("."))
}

#[test]
fn test_linear_chain_wiring() {
    let compilation = compile_str(
        r#"<scenario name="chain">
             <step name="a" exec="true"/>
             <step name="b" exec="true" requires="a"/>
             <step name="c" exec="true" requires="b"/>
           </scenario>"#,
    )
    .unwrap();

    let flow = compilation.flow;
    assert_eq!(flow.steps().len(), 3);
    assert_eq!(flow.topo_order(), ["a", "b", "c"]);
    assert_eq!(flow.prerequisites("c")[0].to, "b");
}

#[test]
fn test_soft_requires_marker() {
    let compilation = compile_str(
        r#"<scenario name="soft">
             <step name="b" exec="false"/>
             <step name="c" exec="true" requires="!b"/>
           </scenario>"#,
    )
    .unwrap();

    let deps = compilation.flow.prerequisites("c");
    assert_eq!(deps.len(), 1);
    assert!(deps[0].soft);
    assert_eq!(deps[0].to, "b");
}

#[test]
fn test_group_members_inherit_group_requires() {
    let compilation = compile_str(
        r#"<scenario name="groups">
             <step name="setup" exec="true"/>
             <group name="g" requires="setup">
               <step name="g1" exec="true"/>
               <step name="g2" exec="true" requires="g1"/>
             </group>
             <step name="d" exec="true" requires="g"/>
           </scenario>"#,
    )
    .unwrap();

    let flow = compilation.flow;
    let g1_reqs: Vec<&str> = flow
        .prerequisites("g1")
        .iter()
        .map(|d| d.to.as_str())
        .collect();
    assert_eq!(g1_reqs, vec!["setup"], "member inherits the group requires");

    let g2_reqs: Vec<&str> = flow
        .prerequisites("g2")
        .iter()
        .map(|d| d.to.as_str())
        .collect();
    assert!(g2_reqs.contains(&"g1"));
    assert!(g2_reqs.contains(&"setup"));

    let group = flow.step("g").unwrap();
    match &group.kind {
        NodeKind::Composite { children } => assert_eq!(children, &["g1", "g2"]),
        NodeKind::Atomic { .. } => panic!("group compiled as atomic"),
    }
    assert_eq!(flow.step("g1").unwrap().group.as_deref(), Some("g"));
}

#[test]
fn test_member_requiring_own_group_is_fatal() {
    let err = compile_str(
        r#"<scenario name="bad">
             <group name="g">
               <step name="g1" exec="true" requires="g"/>
             </group>
           </scenario>"#,
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains("enclosing group"), "got: {err:#}");
}

#[test]
fn test_posthoc_dependency_element() {
    let compilation = compile_str(
        r#"<scenario name="posthoc">
             <step name="a" exec="true"/>
             <step name="b" exec="true"/>
             <dependency step="b" requires="a"/>
           </scenario>"#,
    )
    .unwrap();
    assert_eq!(compilation.flow.prerequisites("b")[0].to, "a");
}

#[test]
fn test_step_attributes_are_compiled() {
    let compilation = compile_str(
        r#"<scenario name="attrs">
             <parameters><param name="who" value="world"/></parameters>
             <step name="a" exec="echo ${who}" env="GREETING=hi,TARGET=${who}"
                   cwd="/tmp" if="true" unless="false" delay="2"/>
           </scenario>"#,
    )
    .unwrap();

    let step = compilation.flow.step("a").unwrap();
    assert_eq!(step.command(), Some("echo world"));
    assert_eq!(
        step.env,
        vec![
            ("GREETING".to_string(), "hi".to_string()),
            ("TARGET".to_string(), "world".to_string()),
        ]
    );
    assert_eq!(step.cwd.as_deref(), Some(Path::new("/tmp")));
    assert_eq!(step.condition.as_deref(), Some("true"));
    assert_eq!(step.unless.as_deref(), Some("false"));
    assert_eq!(step.delay, 2);
}

#[test]
fn test_invalid_delay_is_fatal() {
    let err = compile_str(
        r#"<scenario name="s"><step name="a" exec="true" delay="soon"/></scenario>"#,
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains("delay"), "got: {err:#}");
}

#[test]
fn test_invalid_env_entry_is_fatal() {
    let err = compile_str(
        r#"<scenario name="s"><step name="a" exec="true" env="NOVALUE"/></scenario>"#,
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains("env"), "got: {err:#}");
}

#[test]
fn test_unresolved_requirement_is_fatal() {
    let err = compile_str(
        r#"<scenario name="s"><step name="a" exec="true" requires="ghost"/></scenario>"#,
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains("ghost"), "got: {err:#}");
}

#[test]
fn test_dependency_cycle_is_fatal() {
    let err = compile_str(
        r#"<scenario name="s">
             <step name="a" exec="true" requires="b"/>
             <step name="b" exec="true" requires="a"/>
           </scenario>"#,
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains("cycle"), "got: {err:#}");
}

#[test]
fn test_import_with_namespace() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("sub.xml"),
        r#"<scenario name="sub">
             <step name="prep" exec="true"/>
             <step name="check" exec="true" requires="prep"/>
           </scenario>"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("main.xml"),
        r#"<scenario name="main">
             <import file="sub.xml" namespace="sub"/>
             <step name="done" exec="true" requires="sub.check"/>
           </scenario>"#,
    )
    .unwrap();

    let compilation = compile_file(&dir.path().join("main.xml")).unwrap();
    let flow = compilation.flow;

    assert!(flow.step("sub.prep").is_some());
    assert_eq!(flow.prerequisites("sub.check")[0].to, "sub.prep");
    assert_eq!(flow.prerequisites("done")[0].to, "sub.check");
}

#[test]
fn test_reimport_yields_fresh_namespaced_copies() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("sub.xml"),
        r#"<scenario name="sub"><step name="task" exec="true"/></scenario>"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("main.xml"),
        r#"<scenario name="main">
             <import file="sub.xml" namespace="one"/>
             <import file="sub.xml" namespace="two"/>
           </scenario>"#,
    )
    .unwrap();

    let flow = compile_file(&dir.path().join("main.xml")).unwrap().flow;
    assert!(flow.step("one.task").is_some());
    assert!(flow.step("two.task").is_some());
}

#[test]
fn test_import_dependency_override() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("sub.xml"),
        r#"<scenario name="sub"><step name="task" exec="true"/></scenario>"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("main.xml"),
        r#"<scenario name="main">
             <step name="local" exec="true"/>
             <import file="sub.xml" namespace="sub">
               <dependency step="sub.task" requires="local"/>
             </import>
           </scenario>"#,
    )
    .unwrap();

    let flow = compile_file(&dir.path().join("main.xml")).unwrap().flow;
    assert_eq!(flow.prerequisites("sub.task")[0].to, "local");
}

#[test]
fn test_import_cycle_is_fatal() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("a.xml"),
        r#"<scenario name="a"><import file="b.xml"/></scenario>"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("b.xml"),
        r#"<scenario name="b"><import file="a.xml"/></scenario>"#,
    )
    .unwrap();

    let err = compile_file(&dir.path().join("a.xml")).unwrap_err();
    assert!(format!("{err:#}").contains("Import cycle"), "got: {err:#}");
}

#[test]
fn test_missing_import_file_is_fatal() {
    let err = compile_str(
        r#"<scenario name="s"><import file="does-not-exist.xml"/></scenario>"#,
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains("does-not-exist"), "got: {err:#}");
}

#[test]
fn test_name_collision_is_fatal() {
    let err = compile_str(
        r#"<scenario name="s">
             <step name="a" exec="true"/>
             <step name="a" exec="false"/>
           </scenario>"#,
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains("Duplicate"), "got: {err:#}");
}

#[test]
#[serial_test::serial]
fn test_log_dir_resolution() {
    std::env::remove_var("stcLogDir");
    assert_eq!(log_dir_for("smoke"), Path::new("/tmp/stc/smoke"));

    std::env::set_var("stcLogDir", "/var/log/scenarios");
    assert_eq!(log_dir_for("smoke"), Path::new("/var/log/scenarios/smoke"));
    std::env::remove_var("stcLogDir");
}
