//! FOMOD executor: replays recorded choices against a parsed config.
//!
//! Execution order mirrors the installer wizard: required files first,
//! then each step's groups with the descriptor's selections (collecting
//! condition flags as options are taken), and finally the flag-gated
//! conditional patterns.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use super::parser::{
    DependencyGroup, DependencyOperator, InstallEntry, ModuleConfig,
};
use crate::archive::normalize::merge_directories;
use crate::collection::ChoiceSet;
use crate::paths::{resolve_case_insensitive, to_forward_slashes};

/// What an execution actually did.
#[derive(Debug, Default)]
pub struct FomodOutcome {
    pub files_installed: usize,
    pub folders_installed: usize,
    /// Flags set by selected options.
    pub flags: HashMap<String, String>,
}

/// Execute a FOMOD install.
///
/// `data_root` is the parent of the `fomod` folder; `dest_dir` is the mod
/// folder being populated. Options are matched against `choices`
/// case-insensitively under the `(stepName, groupName)` composite key.
pub fn run_fomod(
    data_root: &Path,
    dest_dir: &Path,
    config: &ModuleConfig,
    choices: &ChoiceSet,
) -> Result<FomodOutcome> {
    let mut outcome = FomodOutcome::default();

    debug!(
        "FOMOD: {} required, {} steps, {} conditional patterns",
        config.required_files.len(),
        config.steps.len(),
        config.conditional_patterns.len()
    );

    for entry in &config.required_files {
        install_entry(data_root, dest_dir, entry, &mut outcome)?;
    }

    for step in &config.steps {
        for group in &step.groups {
            let selected = choices.selected_options(&step.name, &group.name);
            if selected.is_none() {
                debug!(
                    "No selections recorded for step '{}' group '{}'",
                    step.name, group.name
                );
            }

            for plugin in &group.plugins {
                let is_selected = selected
                    .map(|set| set.contains(&plugin.name.to_lowercase()))
                    .unwrap_or(false);
                if !is_selected {
                    continue;
                }

                for flag in &plugin.condition_flags {
                    debug!("Flag {}={}", flag.name, flag.value);
                    outcome.flags.insert(flag.name.clone(), flag.value.clone());
                }

                for entry in &plugin.files {
                    install_entry(data_root, dest_dir, entry, &mut outcome)?;
                }
            }
        }
    }

    for pattern in &config.conditional_patterns {
        if evaluate_dependencies(&pattern.dependencies, &outcome.flags) {
            for entry in &pattern.files {
                install_entry(data_root, dest_dir, entry, &mut outcome)?;
            }
        }
    }

    debug!(
        "FOMOD done: {} files, {} folders",
        outcome.files_installed, outcome.folders_installed
    );

    Ok(outcome)
}

/// Evaluate a dependency expression against the collected flags.
///
/// A flag leaf is satisfied iff the flag is set and equals the required
/// value case-insensitively. An empty expression is true under And and
/// false under Or.
pub fn evaluate_dependencies(deps: &DependencyGroup, flags: &HashMap<String, String>) -> bool {
    let mut results = Vec::with_capacity(deps.flags.len() + deps.nested.len());

    for condition in &deps.flags {
        let satisfied = flags
            .get(&condition.flag)
            .map(|v| v.eq_ignore_ascii_case(&condition.value))
            .unwrap_or(false);
        results.push(satisfied);
    }

    for nested in &deps.nested {
        results.push(evaluate_dependencies(nested, flags));
    }

    match deps.operator {
        DependencyOperator::And => results.iter().all(|&r| r),
        DependencyOperator::Or => results.iter().any(|&r| r),
    }
}

/// Rewrite a FOMOD destination: root markers mean the mod root, and a
/// leading `Data/` level is stripped because MO2 mod folders already sit
/// in Data context.
fn normalize_destination(destination: &str, is_folder: bool, source: &str) -> String {
    let mut dest = to_forward_slashes(destination);

    if dest == "/" {
        dest = if is_folder {
            String::new()
        } else {
            file_name_of(source)
        };
    }

    let lower = dest.to_lowercase();
    if lower == "data" || lower == "data/" {
        dest = String::new();
    } else if lower.starts_with("data/") {
        dest = dest[5..].to_string();
    }

    dest
}

fn file_name_of(source: &str) -> String {
    Path::new(source)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| source.to_string())
}

/// Install one `<file>`/`<folder>` entry. Files overwrite; folders merge
/// case-insensitively into the destination.
fn install_entry(
    data_root: &Path,
    dest_dir: &Path,
    entry: &InstallEntry,
    outcome: &mut FomodOutcome,
) -> Result<()> {
    if entry.source.is_empty() {
        return Ok(());
    }

    let source = to_forward_slashes(&entry.source);
    let dest = normalize_destination(&entry.destination, entry.is_folder, &source);

    let source_path = resolve_case_insensitive(data_root, &source)
        .with_context(|| format!("FOMOD source not found: {}", entry.source))?;

    if entry.is_folder {
        let dest_path = if dest.is_empty() {
            dest_dir.to_path_buf()
        } else {
            dest_dir.join(&dest)
        };
        merge_directories(&source_path, &dest_path)?;
        outcome.folders_installed += 1;
        // merge_directories does not count; walk is wasteful here, so the
        // file tally only tracks explicit <file> installs.
    } else {
        let dest_path = if dest.is_empty() {
            dest_dir.join(file_name_of(&source))
        } else if dest.ends_with('/') {
            dest_dir.join(&dest).join(file_name_of(&source))
        } else {
            dest_dir.join(&dest)
        };

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        if dest_path.exists() {
            fs::remove_file(&dest_path)
                .with_context(|| format!("Failed to replace {}", dest_path.display()))?;
        }
        fs::copy(&source_path, &dest_path).with_context(|| {
            format!(
                "Failed to copy {} -> {}",
                source_path.display(),
                dest_path.display()
            )
        })?;
        outcome.files_installed += 1;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{Choice, ChoiceGroup, ChoiceStep, FomodChoices};
    use crate::fomod::parser::{parse_module_config_xml, FlagCondition};
    use tempfile::tempdir;

    fn choice_set(entries: &[(&str, &str, &[&str])]) -> ChoiceSet {
        let options = entries
            .iter()
            .map(|(step, group, picks)| ChoiceStep {
                name: step.to_string(),
                groups: vec![ChoiceGroup {
                    name: group.to_string(),
                    choices: picks
                        .iter()
                        .enumerate()
                        .map(|(i, name)| Choice {
                            name: name.to_string(),
                            idx: i as i32,
                        })
                        .collect(),
                }],
            })
            .collect();
        ChoiceSet::from_choices(&FomodChoices { options })
    }

    fn touch(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_evaluate_and_or() {
        let mut flags = HashMap::new();
        flags.insert("A".to_string(), "true".to_string());

        let and = DependencyGroup {
            operator: DependencyOperator::And,
            flags: vec![
                FlagCondition { flag: "A".into(), value: "TRUE".into() },
                FlagCondition { flag: "B".into(), value: "true".into() },
            ],
            nested: vec![],
        };
        assert!(!evaluate_dependencies(&and, &flags));
        flags.insert("B".to_string(), "true".to_string());
        assert!(evaluate_dependencies(&and, &flags));

        let or = DependencyGroup {
            operator: DependencyOperator::Or,
            flags: vec![
                FlagCondition { flag: "A".into(), value: "false".into() },
                FlagCondition { flag: "B".into(), value: "true".into() },
            ],
            nested: vec![],
        };
        assert!(evaluate_dependencies(&or, &flags));
    }

    #[test]
    fn test_evaluate_empty() {
        let flags = HashMap::new();
        let empty_and = DependencyGroup::default();
        assert!(evaluate_dependencies(&empty_and, &flags));

        let empty_or = DependencyGroup {
            operator: DependencyOperator::Or,
            ..Default::default()
        };
        assert!(!evaluate_dependencies(&empty_or, &flags));
    }

    #[test]
    fn test_normalize_destination() {
        assert_eq!(normalize_destination("", false, "a/b.esp"), "");
        assert_eq!(normalize_destination("/", false, "a/b.esp"), "b.esp");
        assert_eq!(normalize_destination("\\", true, "a"), "");
        assert_eq!(normalize_destination("Data", true, "a"), "");
        assert_eq!(
            normalize_destination("Data\\scripts", true, "a"),
            "scripts"
        );
        assert_eq!(normalize_destination("textures", true, "a"), "textures");
    }

    #[test]
    fn test_required_files_installed() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        touch(&src.path().join("core.esp"), "esp");

        let config = parse_module_config_xml(
            r#"<config><requiredInstallFiles><file source="core.esp"/></requiredInstallFiles></config>"#,
        )
        .unwrap();

        let outcome = run_fomod(src.path(), dst.path(), &config, &ChoiceSet::default()).unwrap();
        assert_eq!(outcome.files_installed, 1);
        assert!(dst.path().join("core.esp").is_file());
    }

    #[test]
    fn test_composite_key_no_cross_step_leakage() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        touch(&src.path().join("notice/proceed.esp"), "1");
        touch(&src.path().join("marker/simplified.esp"), "2");
        touch(&src.path().join("marker/colored.esp"), "3");
        touch(&src.path().join("notice/simplified-trap.esp"), "4");

        let xml = r#"<config>
<installSteps>
  <installStep name="Installation Notice">
    <optionalFileGroups>
      <group name="Read first">
        <plugins>
          <plugin name="Proceed"><files><file source="notice/proceed.esp"/></files></plugin>
          <plugin name="Simplified"><files><file source="notice/simplified-trap.esp"/></files></plugin>
        </plugins>
      </group>
    </optionalFileGroups>
  </installStep>
  <installStep name="Choose Marker version">
    <optionalFileGroups>
      <group name="Read first">
        <plugins>
          <plugin name="Simplified"><files><file source="marker/simplified.esp"/></files></plugin>
        </plugins>
      </group>
      <group name="Color Variation">
        <plugins>
          <plugin name="Non colored Main Cities"><files><file source="marker/colored.esp"/></files></plugin>
        </plugins>
      </group>
    </optionalFileGroups>
  </installStep>
</installSteps>
</config>"#;
        let config = parse_module_config_xml(xml).unwrap();

        let choices = choice_set(&[
            ("Installation Notice", "Read first", &["Proceed"]),
            ("Choose Marker version", "Read first", &["Simplified"]),
            (
                "Choose Marker version",
                "Color Variation",
                &["Non colored Main Cities"],
            ),
        ]);

        run_fomod(src.path(), dst.path(), &config, &choices).unwrap();

        assert!(dst.path().join("proceed.esp").is_file());
        assert!(dst.path().join("simplified.esp").is_file());
        assert!(dst.path().join("colored.esp").is_file());
        // "Simplified" under "Installation Notice" was NOT selected.
        assert!(!dst.path().join("simplified-trap.esp").exists());
    }

    #[test]
    fn test_flags_gate_conditional_installs() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        touch(&src.path().join("opt/a.esp"), "a");
        touch(&src.path().join("extra/bonus.esp"), "b");

        let xml = r#"<config>
<installSteps>
  <installStep name="Main">
    <optionalFileGroups>
      <group name="Options">
        <plugins>
          <plugin name="Enable A">
            <files><file source="opt/a.esp"/></files>
            <conditionFlags><flag name="WantBonus">true</flag></conditionFlags>
          </plugin>
        </plugins>
      </group>
    </optionalFileGroups>
  </installStep>
</installSteps>
<conditionalFileInstalls>
  <patterns>
    <pattern>
      <dependencies operator="And">
        <flagDependency flag="WantBonus" value="True"/>
      </dependencies>
      <files><file source="extra/bonus.esp"/></files>
    </pattern>
  </patterns>
</conditionalFileInstalls>
</config>"#;
        let config = parse_module_config_xml(xml).unwrap();

        let choices = choice_set(&[("Main", "Options", &["Enable A"])]);
        let outcome = run_fomod(src.path(), dst.path(), &config, &choices).unwrap();

        assert_eq!(outcome.flags.get("WantBonus").unwrap(), "true");
        assert!(dst.path().join("a.esp").is_file());
        // Case-insensitive flag value match.
        assert!(dst.path().join("bonus.esp").is_file());
    }

    #[test]
    fn test_folder_install_merges_case_insensitive() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        touch(&src.path().join("optionA/Meshes/a.nif"), "a");
        touch(&dst.path().join("meshes/existing.nif"), "e");

        let xml = r#"<config>
<requiredInstallFiles><folder source="OPTIONA" destination="/"/></requiredInstallFiles>
</config>"#;
        let config = parse_module_config_xml(xml).unwrap();

        run_fomod(src.path(), dst.path(), &config, &ChoiceSet::default()).unwrap();

        assert!(dst.path().join("meshes/a.nif").is_file());
        assert!(dst.path().join("meshes/existing.nif").is_file());
        assert!(!dst.path().join("Meshes").exists());
    }

    #[test]
    fn test_file_destination_directory_suffix() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        touch(&src.path().join("plugin.dll"), "x");

        let xml = r#"<config>
<requiredInstallFiles><file source="plugin.dll" destination="SKSE/Plugins/"/></requiredInstallFiles>
</config>"#;
        let config = parse_module_config_xml(xml).unwrap();

        run_fomod(src.path(), dst.path(), &config, &ChoiceSet::default()).unwrap();
        assert!(dst.path().join("SKSE/Plugins/plugin.dll").is_file());
    }
}
