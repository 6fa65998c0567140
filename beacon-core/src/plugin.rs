//! Plugin hooks
//!
//! Plugins are registered by name and invoked at fixed hook points. A hook
//! that returns a string has it appended verbatim to the outbound request.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use crate::error::BeaconError;

/// Hook points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// Page load finished
    Load,
    /// Page is about to unload
    Unload,
    /// Tracker constructed
    Run,
    /// Page view
    Log,
    /// Heartbeat ping
    Ping,
    Event,
    SiteSearch,
    Goal,
    Link,
    Ecommerce,
}

impl Hook {
    pub fn as_str(&self) -> &'static str {
        match self {
            Hook::Load => "load",
            Hook::Unload => "unload",
            Hook::Run => "run",
            Hook::Log => "log",
            Hook::Ping => "ping",
            Hook::Event => "event",
            Hook::SiteSearch => "sitesearch",
            Hook::Goal => "goal",
            Hook::Link => "link",
            Hook::Ecommerce => "ecommerce",
        }
    }
}

impl FromStr for Hook {
    type Err = BeaconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "load" => Hook::Load,
            "unload" => Hook::Unload,
            "run" => Hook::Run,
            "log" => Hook::Log,
            "ping" => Hook::Ping,
            "event" => Hook::Event,
            "sitesearch" => Hook::SiteSearch,
            "goal" => Hook::Goal,
            "link" => Hook::Link,
            "ecommerce" => Hook::Ecommerce,
            other => {
                return Err(BeaconError::InvalidConfig {
                    reason: format!("unknown plugin hook '{other}'"),
                })
            }
        })
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Code invoked at hook points
pub trait Plugin {
    /// Handle `hook`; a returned string is appended to the request being built
    fn call(&self, hook: Hook) -> Option<String>;
}

/// Plugin assembled from closures, one per hook
#[derive(Default)]
pub struct FnPlugin {
    handlers: Vec<(Hook, Box<dyn Fn() -> Option<String>>)>,
}

impl FnPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, hook: Hook, handler: impl Fn() -> Option<String> + 'static) -> Self {
        self.handlers.push((hook, Box::new(handler)));
        self
    }
}

impl Plugin for FnPlugin {
    fn call(&self, hook: Hook) -> Option<String> {
        let mut out: Option<String> = None;
        for (_, handler) in self.handlers.iter().filter(|(h, _)| *h == hook) {
            if let Some(fragment) = handler() {
                out.get_or_insert_with(String::new).push_str(&fragment);
            }
        }
        out
    }
}

/// Named plugins, in registration order
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RefCell<Vec<(String, Rc<dyn Plugin>)>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `plugin`; an existing plugin of the same name is replaced in place
    pub fn add(&self, name: &str, plugin: Rc<dyn Plugin>) {
        let mut plugins = self.plugins.borrow_mut();
        match plugins.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = plugin,
            None => plugins.push((name.to_string(), plugin)),
        }
        tracing::debug!(plugin = name, "plugin registered");
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins.borrow().iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.borrow().is_empty()
    }

    /// Run `hook` on every plugin and concatenate what they return
    pub fn execute(&self, hook: Hook) -> String {
        // Plugins may register further plugins while running.
        let plugins: Vec<Rc<dyn Plugin>> = self.plugins.borrow().iter().map(|(_, p)| p.clone()).collect();
        plugins.iter().filter_map(|p| p.call(hook)).collect()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry").field("plugins", &self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragments_concatenate_in_registration_order() {
        let registry = PluginRegistry::new();
        registry.add("a", Rc::new(FnPlugin::new().on(Hook::Log, || Some("&a=1".to_string()))));
        registry.add("b", Rc::new(FnPlugin::new().on(Hook::Log, || Some("&b=2".to_string()))));
        registry.add("c", Rc::new(FnPlugin::new().on(Hook::Goal, || Some("&c=3".to_string()))));

        assert_eq!(registry.execute(Hook::Log), "&a=1&b=2");
        assert_eq!(registry.execute(Hook::Goal), "&c=3");
        assert_eq!(registry.execute(Hook::Ping), "");
    }

    #[test]
    fn test_same_name_replaces_in_place() {
        let registry = PluginRegistry::new();
        registry.add("a", Rc::new(FnPlugin::new().on(Hook::Log, || Some("&old".to_string()))));
        registry.add("b", Rc::new(FnPlugin::new().on(Hook::Log, || Some("&b".to_string()))));
        registry.add("a", Rc::new(FnPlugin::new().on(Hook::Log, || Some("&new".to_string()))));

        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(registry.execute(Hook::Log), "&new&b");
    }

    #[test]
    fn test_hook_names_round_trip() {
        for hook in [Hook::Load, Hook::SiteSearch, Hook::Ecommerce] {
            assert_eq!(hook.as_str().parse::<Hook>().unwrap(), hook);
        }
        assert!("overlay".parse::<Hook>().is_err());
    }
}
