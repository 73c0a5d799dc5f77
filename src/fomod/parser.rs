//! ModuleConfig.xml parser.
//!
//! Event-driven parse via quick-xml into a plain data model. Attribute
//! values may use single or double quotes and comments / processing
//! instructions are skipped, both courtesy of quick-xml; encoding quirks
//! are handled before the text reaches us (see [`super::encoding`]).

use std::path::Path;

use anyhow::Result;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::encoding::read_xml_file;
use crate::error::BridgeError;

/// Parsed FOMOD configuration.
#[derive(Debug, Clone, Default)]
pub struct ModuleConfig {
    pub module_name: String,
    /// Installed unconditionally, before any step runs.
    pub required_files: Vec<InstallEntry>,
    pub steps: Vec<InstallStep>,
    pub conditional_patterns: Vec<ConditionalPattern>,
}

/// One wizard step.
#[derive(Debug, Clone, Default)]
pub struct InstallStep {
    pub name: String,
    pub groups: Vec<OptionGroup>,
}

/// A named group of selectable options inside a step.
#[derive(Debug, Clone, Default)]
pub struct OptionGroup {
    pub name: String,
    pub plugins: Vec<OptionPlugin>,
}

/// A selectable option ("plugin" in FOMOD terms).
#[derive(Debug, Clone, Default)]
pub struct OptionPlugin {
    pub name: String,
    pub files: Vec<InstallEntry>,
    /// Flags set when this option is selected; consumed by the
    /// conditional patterns.
    pub condition_flags: Vec<FlagAssignment>,
}

/// A `<file>` or `<folder>` element.
#[derive(Debug, Clone, Default)]
pub struct InstallEntry {
    /// Source path relative to the FOMOD data root.
    pub source: String,
    /// Destination relative to the mod root; empty means "derive it".
    pub destination: String,
    pub priority: i32,
    pub is_folder: bool,
}

/// A `<flag name="...">value</flag>` assignment.
#[derive(Debug, Clone, Default)]
pub struct FlagAssignment {
    pub name: String,
    pub value: String,
}

/// A `<pattern>` under `<conditionalFileInstalls>`.
#[derive(Debug, Clone, Default)]
pub struct ConditionalPattern {
    pub dependencies: DependencyGroup,
    pub files: Vec<InstallEntry>,
}

/// A `<dependencies>` expression: flag leaves plus nested groups, combined
/// with And (the default) or Or.
#[derive(Debug, Clone, Default)]
pub struct DependencyGroup {
    pub operator: DependencyOperator,
    pub flags: Vec<FlagCondition>,
    pub nested: Vec<DependencyGroup>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DependencyOperator {
    #[default]
    And,
    Or,
}

impl DependencyOperator {
    fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("or") {
            DependencyOperator::Or
        } else {
            DependencyOperator::And
        }
    }
}

/// A `<flagDependency flag="..." value="..."/>` leaf.
#[derive(Debug, Clone, Default)]
pub struct FlagCondition {
    pub flag: String,
    pub value: String,
}

/// Parse a ModuleConfig.xml file from disk.
pub fn parse_module_config(path: &Path) -> Result<ModuleConfig> {
    let xml = read_xml_file(path)?;
    parse_module_config_xml(&xml)
}

fn attr_value(element: &BytesStart, key: &[u8]) -> Option<String> {
    element.attributes().flatten().find_map(|attr| {
        if attr.key.as_ref() == key {
            Some(
                attr.unescape_value()
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned()),
            )
        } else {
            None
        }
    })
}

fn parse_install_entry(element: &BytesStart, is_folder: bool) -> InstallEntry {
    InstallEntry {
        source: attr_value(element, b"source").unwrap_or_default(),
        destination: attr_value(element, b"destination").unwrap_or_default(),
        priority: attr_value(element, b"priority")
            .and_then(|p| p.parse().ok())
            .unwrap_or(0),
        is_folder,
    }
}

fn parse_flag_condition(element: &BytesStart) -> FlagCondition {
    FlagCondition {
        flag: attr_value(element, b"flag").unwrap_or_default(),
        value: attr_value(element, b"value").unwrap_or_default(),
    }
}

/// Parser state threaded through the event loop.
#[derive(Default)]
struct ParseState {
    in_required_files: bool,
    in_steps: bool,
    in_conditional: bool,
    current_step: Option<InstallStep>,
    current_group: Option<OptionGroup>,
    current_plugin: Option<OptionPlugin>,
    current_pattern: Option<ConditionalPattern>,
    /// Stack of open `<dependencies>` groups inside the current pattern.
    dependency_stack: Vec<DependencyGroup>,
}

impl ParseState {
    fn push_entry(&mut self, config: &mut ModuleConfig, entry: InstallEntry) {
        if let Some(plugin) = self.current_plugin.as_mut() {
            plugin.files.push(entry);
        } else if let Some(pattern) = self.current_pattern.as_mut() {
            pattern.files.push(entry);
        } else if self.in_required_files {
            config.required_files.push(entry);
        }
    }

    fn push_flag_condition(&mut self, condition: FlagCondition) {
        if let Some(group) = self.dependency_stack.last_mut() {
            group.flags.push(condition);
        }
    }
}

/// Parse a ModuleConfig document from UTF-8 text.
pub fn parse_module_config_xml(xml: &str) -> Result<ModuleConfig> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut config = ModuleConfig::default();
    let mut state = ParseState::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,

            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_lowercase();
                match name.as_str() {
                    "modulename" => {
                        config.module_name =
                            reader.read_text(e.name()).unwrap_or_default().to_string();
                    }
                    "requiredinstallfiles" => state.in_required_files = true,
                    "installsteps" => state.in_steps = true,
                    "conditionalfileinstalls" => state.in_conditional = true,
                    "installstep" if state.in_steps => {
                        state.current_step = Some(InstallStep {
                            name: attr_value(e, b"name").unwrap_or_default(),
                            groups: Vec::new(),
                        });
                    }
                    "group" if state.current_step.is_some() => {
                        state.current_group = Some(OptionGroup {
                            name: attr_value(e, b"name").unwrap_or_default(),
                            plugins: Vec::new(),
                        });
                    }
                    "plugin" if state.current_group.is_some() => {
                        state.current_plugin = Some(OptionPlugin {
                            name: attr_value(e, b"name").unwrap_or_default(),
                            ..Default::default()
                        });
                    }
                    "file" | "folder" => {
                        let entry = parse_install_entry(e, name == "folder");
                        state.push_entry(&mut config, entry);
                    }
                    "flag" => {
                        if let Some(plugin) = state.current_plugin.as_mut() {
                            let flag_name = attr_value(e, b"name").unwrap_or_default();
                            let value =
                                reader.read_text(e.name()).unwrap_or_default().to_string();
                            plugin.condition_flags.push(FlagAssignment {
                                name: flag_name,
                                value,
                            });
                        }
                    }
                    "pattern" if state.in_conditional => {
                        state.current_pattern = Some(ConditionalPattern::default());
                        state.dependency_stack.clear();
                    }
                    "dependencies" if state.current_pattern.is_some() => {
                        let operator = attr_value(e, b"operator")
                            .map(|op| DependencyOperator::parse(&op))
                            .unwrap_or_default();
                        state.dependency_stack.push(DependencyGroup {
                            operator,
                            ..Default::default()
                        });
                    }
                    "flagdependency" => {
                        state.push_flag_condition(parse_flag_condition(e));
                    }
                    _ => {}
                }
            }

            // Self-closing elements: <file .../>, <folder .../>, <flagDependency .../>
            Ok(Event::Empty(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_lowercase();
                match name.as_str() {
                    "file" | "folder" => {
                        let entry = parse_install_entry(e, name == "folder");
                        state.push_entry(&mut config, entry);
                    }
                    "flagdependency" => {
                        state.push_flag_condition(parse_flag_condition(e));
                    }
                    "dependencies" if state.current_pattern.is_some() => {
                        // An empty group still carries its operator semantics.
                        let operator = attr_value(e, b"operator")
                            .map(|op| DependencyOperator::parse(&op))
                            .unwrap_or_default();
                        let group = DependencyGroup {
                            operator,
                            ..Default::default()
                        };
                        if let Some(parent) = state.dependency_stack.last_mut() {
                            parent.nested.push(group);
                        } else if let Some(pattern) = state.current_pattern.as_mut() {
                            pattern.dependencies = group;
                        }
                    }
                    _ => {}
                }
            }

            Ok(Event::End(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_lowercase();
                match name.as_str() {
                    "requiredinstallfiles" => state.in_required_files = false,
                    "installsteps" => state.in_steps = false,
                    "conditionalfileinstalls" => state.in_conditional = false,
                    "installstep" => {
                        if let Some(step) = state.current_step.take() {
                            config.steps.push(step);
                        }
                    }
                    "group" => {
                        if let (Some(group), Some(step)) =
                            (state.current_group.take(), state.current_step.as_mut())
                        {
                            step.groups.push(group);
                        }
                    }
                    "plugin" => {
                        if let (Some(plugin), Some(group)) =
                            (state.current_plugin.take(), state.current_group.as_mut())
                        {
                            group.plugins.push(plugin);
                        }
                    }
                    "dependencies" => {
                        if let Some(group) = state.dependency_stack.pop() {
                            if let Some(parent) = state.dependency_stack.last_mut() {
                                parent.nested.push(group);
                            } else if let Some(pattern) = state.current_pattern.as_mut() {
                                pattern.dependencies = group;
                            }
                        }
                    }
                    "pattern" => {
                        if let Some(pattern) = state.current_pattern.take() {
                            config.conditional_patterns.push(pattern);
                        }
                        state.dependency_stack.clear();
                    }
                    _ => {}
                }
            }

            Ok(_) => {} // text, comments, processing instructions

            Err(e) => {
                return Err(BridgeError::FomodXmlInvalid(format!(
                    "XML parse error at byte {}: {}",
                    reader.buffer_position(),
                    e
                ))
                .into());
            }
        }
        buf.clear();
    }

    Ok(config)
}
