//! Plugin registry and dispatch bookkeeping
//!
//! The registry maps plugin names to asserter, logic hook and user input
//! implementations. Plugins participate in two scopes:
//!
//! - **local**: a [`StepRef`] on a convo step, with per-step arguments
//! - **global**: registered once with registration-time arguments, fanned
//!   out to every step
//!
//! A plugin registered both locally and globally fires twice, once per
//! scope. The compiler consults [`PluginRegistry::recognize`] to decide
//! whether the first token of a script line names a plugin.
//!
//! [`ConditionalGroupTracker`] records, per condition group, whether any
//! member step executed; the group-end marker turns a fully skipped group
//! into an error.

use sdk::errors::EngineError;
use sdk::plugin::{Asserter, LogicHook, UserInput};
use sdk::types::{ConvoStep, StepRef};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Which plugin family a name belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    Asserter,
    LogicHook,
    UserInput,
}

/// Logic hook dispatch points, in convo order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    ConvoBegin,
    MeStart,
    MeEnd,
    BotStart,
    BotPrepare,
    BotEnd,
    ConvoEnd,
}

/// An asserter resolved for one step, local or global
#[derive(Clone)]
pub struct ResolvedAsserter {
    pub name: String,
    pub plugin: Arc<dyn Asserter>,
    pub args: Vec<String>,
    pub is_global: bool,
}

/// A logic hook resolved for one step, local or global
#[derive(Clone)]
pub struct ResolvedHook {
    pub name: String,
    pub plugin: Arc<dyn LogicHook>,
    pub args: Vec<String>,
    pub is_global: bool,
}

/// A user input resolved for one step
#[derive(Clone)]
pub struct ResolvedUserInput {
    pub name: String,
    pub plugin: Arc<dyn UserInput>,
    pub args: Vec<String>,
}

/// Name-indexed plugin registry with local and global scopes
#[derive(Default)]
pub struct PluginRegistry {
    asserters: HashMap<String, Arc<dyn Asserter>>,
    logic_hooks: HashMap<String, Arc<dyn LogicHook>>,
    user_inputs: HashMap<String, Arc<dyn UserInput>>,
    global_asserters: Vec<StepRef>,
    global_hooks: Vec<StepRef>,
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-loaded with the built-in plugin library
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::asserters::register_builtins(&mut registry);
        crate::logic_hooks::register_builtins(&mut registry);
        crate::user_inputs::register_builtins(&mut registry);
        registry
    }

    pub fn register_asserter(&mut self, name: impl Into<String>, plugin: Arc<dyn Asserter>) {
        let name = name.into();
        debug!("registering asserter {}", name);
        self.asserters.insert(name, plugin);
    }

    pub fn register_logic_hook(&mut self, name: impl Into<String>, plugin: Arc<dyn LogicHook>) {
        let name = name.into();
        debug!("registering logic hook {}", name);
        self.logic_hooks.insert(name, plugin);
    }

    pub fn register_user_input(&mut self, name: impl Into<String>, plugin: Arc<dyn UserInput>) {
        let name = name.into();
        debug!("registering user input {}", name);
        self.user_inputs.insert(name, plugin);
    }

    /// Register an asserter reference applied to every bot step
    pub fn register_global_asserter(&mut self, reference: StepRef) -> Result<(), EngineError> {
        if !self.asserters.contains_key(&reference.name) {
            return Err(EngineError::Config(format!(
                "global asserter \"{}\" is not registered",
                reference.name
            )));
        }
        self.global_asserters.push(reference);
        Ok(())
    }

    /// Register a logic hook reference applied to every step
    pub fn register_global_hook(&mut self, reference: StepRef) -> Result<(), EngineError> {
        if !self.logic_hooks.contains_key(&reference.name) {
            return Err(EngineError::Config(format!(
                "global logic hook \"{}\" is not registered",
                reference.name
            )));
        }
        self.global_hooks.push(reference);
        Ok(())
    }

    /// Plugin family of a registered name, respecting the step's sender.
    /// A name registered both as asserter and user input (e.g. `MEDIA`)
    /// resolves to the user input in me sections.
    pub fn recognize_for(&self, name: &str, sender: sdk::types::Sender) -> Option<PluginKind> {
        if sender == sdk::types::Sender::Me && self.user_inputs.contains_key(name) {
            return Some(PluginKind::UserInput);
        }
        self.recognize(name)
    }

    /// Plugin family of a registered name, if any. `INCLUDE` is always
    /// recognized as a logic hook; the compiler resolves it at expansion
    /// time.
    pub fn recognize(&self, name: &str) -> Option<PluginKind> {
        if name == "INCLUDE" || self.logic_hooks.contains_key(name) {
            Some(PluginKind::LogicHook)
        } else if self.asserters.contains_key(name) {
            Some(PluginKind::Asserter)
        } else if self.user_inputs.contains_key(name) {
            Some(PluginKind::UserInput)
        } else {
            None
        }
    }

    /// Asserters to evaluate for a step: local references in script order,
    /// then globals in registration order
    pub fn asserters_for_step(&self, step: &ConvoStep) -> Result<Vec<ResolvedAsserter>, EngineError> {
        let mut resolved = Vec::new();
        for reference in &step.asserters {
            let plugin = self.asserters.get(&reference.name).ok_or_else(|| {
                EngineError::Compile(format!(
                    "{}: asserter \"{}\" is not registered",
                    step.step_tag, reference.name
                ))
            })?;
            resolved.push(ResolvedAsserter {
                name: reference.name.clone(),
                plugin: Arc::clone(plugin),
                args: reference.args.clone(),
                is_global: false,
            });
        }
        for reference in &self.global_asserters {
            if let Some(plugin) = self.asserters.get(&reference.name) {
                resolved.push(ResolvedAsserter {
                    name: reference.name.clone(),
                    plugin: Arc::clone(plugin),
                    args: reference.args.clone(),
                    is_global: true,
                });
            }
        }
        Ok(resolved)
    }

    /// Logic hooks to run for a step: local references, then globals
    pub fn hooks_for_step(&self, step: &ConvoStep) -> Result<Vec<ResolvedHook>, EngineError> {
        let mut resolved = Vec::new();
        for reference in &step.logic_hooks {
            let plugin = self.logic_hooks.get(&reference.name).ok_or_else(|| {
                EngineError::Compile(format!(
                    "{}: logic hook \"{}\" is not registered",
                    step.step_tag, reference.name
                ))
            })?;
            resolved.push(ResolvedHook {
                name: reference.name.clone(),
                plugin: Arc::clone(plugin),
                args: reference.args.clone(),
                is_global: false,
            });
        }
        for reference in &self.global_hooks {
            if let Some(plugin) = self.logic_hooks.get(&reference.name) {
                resolved.push(ResolvedHook {
                    name: reference.name.clone(),
                    plugin: Arc::clone(plugin),
                    args: reference.args.clone(),
                    is_global: true,
                });
            }
        }
        Ok(resolved)
    }

    /// Global logic hooks only, for convo-level phases with no step
    pub fn global_hooks(&self) -> Result<Vec<ResolvedHook>, EngineError> {
        let mut resolved = Vec::new();
        for reference in &self.global_hooks {
            if let Some(plugin) = self.logic_hooks.get(&reference.name) {
                resolved.push(ResolvedHook {
                    name: reference.name.clone(),
                    plugin: Arc::clone(plugin),
                    args: reference.args.clone(),
                    is_global: true,
                });
            }
        }
        Ok(resolved)
    }

    /// Global asserter references, for convo-begin/end assertion phases
    pub fn global_asserters(&self) -> Vec<ResolvedAsserter> {
        self.global_asserters
            .iter()
            .filter_map(|reference| {
                self.asserters.get(&reference.name).map(|plugin| ResolvedAsserter {
                    name: reference.name.clone(),
                    plugin: Arc::clone(plugin),
                    args: reference.args.clone(),
                    is_global: true,
                })
            })
            .collect()
    }

    /// A registered asserter by name
    pub fn asserter(&self, name: &str) -> Option<Arc<dyn Asserter>> {
        self.asserters.get(name).map(Arc::clone)
    }

    /// User inputs to apply for a me step, script order
    pub fn user_inputs_for_step(
        &self,
        step: &ConvoStep,
    ) -> Result<Vec<ResolvedUserInput>, EngineError> {
        let mut resolved = Vec::new();
        for reference in &step.user_inputs {
            let plugin = self.user_inputs.get(&reference.name).ok_or_else(|| {
                EngineError::Compile(format!(
                    "{}: user input \"{}\" is not registered",
                    step.step_tag, reference.name
                ))
            })?;
            resolved.push(ResolvedUserInput {
                name: reference.name.clone(),
                plugin: Arc::clone(plugin),
                args: reference.args.clone(),
            });
        }
        Ok(resolved)
    }
}

/// Per-run bookkeeping for conditional step groups
///
/// `record` is called for every group member after its bot-prepare phase;
/// `check_group_end` is called when a member carries the group-end marker.
#[derive(Debug, Default)]
pub struct ConditionalGroupTracker {
    executed: HashMap<String, bool>,
}

impl ConditionalGroupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record whether a group member executed (was not skipped)
    pub fn record(&mut self, group_id: &str, executed: bool) {
        let entry = self.executed.entry(group_id.to_string()).or_insert(false);
        *entry = *entry || executed;
    }

    /// Fail when the group reaches its end marker with every member skipped
    pub fn check_group_end(&self, step_tag: &str, group_id: &str) -> Result<(), EngineError> {
        match self.executed.get(group_id) {
            Some(true) => Ok(()),
            _ => Err(EngineError::ConditionGroupUnmet {
                step_tag: step_tag.to_string(),
                group_id: group_id.to_string(),
            }),
        }
    }
}
