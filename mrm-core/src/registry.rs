//! Entry point registration.
//!
//! The set of host-visible functions is fixed. [`register`] installs all of
//! them into a [`HostNamespace`] in one explicit step; nothing is registered
//! as a side effect of loading the crate.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::bridge::Bridge;
use crate::delivery::PullStream;
use crate::error::{Error, Result};
use crate::host::HostValue;

/// The host-visible entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    /// `mrm_parse(source)`
    Parse,
    /// `mrm_generate(problem)`
    Generate,
    /// `mrm_generate_streamed(problem)`, delivers on the message channel
    GenerateStreamed,
    /// `mrm_stream(problem)`, returns a pull stream
    GenerateStream,
}

impl EntryPoint {
    pub const ALL: [EntryPoint; 4] = [
        EntryPoint::Parse,
        EntryPoint::Generate,
        EntryPoint::GenerateStreamed,
        EntryPoint::GenerateStream,
    ];

    /// Name under which the entry point is registered.
    pub fn name(self) -> &'static str {
        match self {
            Self::Parse => "mrm_parse",
            Self::Generate => "mrm_generate",
            Self::GenerateStreamed => "mrm_generate_streamed",
            Self::GenerateStream => "mrm_stream",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|entry| entry.name() == name)
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What an entry point hands back to the host.
#[derive(Debug)]
pub enum HostReturn {
    /// An encoded envelope
    Json(String),
    /// A pull stream for the host to wrap in its readable stream type
    Stream(PullStream),
}

impl HostReturn {
    pub fn as_json(&self) -> Option<&str> {
        match self {
            Self::Json(json) => Some(json),
            Self::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<PullStream> {
        match self {
            Self::Stream(stream) => Some(stream),
            Self::Json(_) => None,
        }
    }
}

/// A function callable by the host.
pub type HostFunction = Arc<dyn Fn(&[HostValue]) -> Result<HostReturn> + Send + Sync>;

/// Registration target, typically the host's global object.
pub trait HostNamespace {
    /// Bind a function under a name.
    fn define(&mut self, name: &'static str, function: HostFunction) -> Result<()>;
}

/// Install every entry point of the bridge into the namespace.
pub fn register(bridge: Arc<Bridge>, namespace: &mut dyn HostNamespace) -> Result<()> {
    for entry in EntryPoint::ALL {
        let bridge = Arc::clone(&bridge);
        let function: HostFunction = Arc::new(move |args: &[HostValue]| bridge.invoke(entry, args));
        namespace.define(entry.name(), function)?;
    }
    info!(entry_points = EntryPoint::ALL.len(), "Registered entry points");
    Ok(())
}

/// In-process namespace: a name-to-function table.
#[derive(Default)]
pub struct FunctionTable {
    functions: HashMap<&'static str, HostFunction>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call a registered function by name.
    pub fn call(&self, name: &str, args: &[HostValue]) -> Result<HostReturn> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| Error::Internal(format!("no entry point named '{}'", name)))?;
        function(args)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.functions.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl HostNamespace for FunctionTable {
    fn define(&mut self, name: &'static str, function: HostFunction) -> Result<()> {
        if self.functions.contains_key(name) {
            return Err(Error::Internal(format!(
                "entry point '{}' is already registered",
                name
            )));
        }
        self.functions.insert(name, function);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::engine::CalcEngine;
    use pretty_assertions::assert_eq;

    fn bridge(rt: &tokio::runtime::Runtime) -> Arc<Bridge> {
        Arc::new(Bridge::with_handle(
            BridgeConfig::default(),
            Arc::new(CalcEngine::default()),
            rt.handle().clone(),
        ))
    }

    #[test]
    fn test_entry_point_names() {
        for entry in EntryPoint::ALL {
            assert_eq!(EntryPoint::from_name(entry.name()), Some(entry));
        }
        assert_eq!(EntryPoint::GenerateStream.to_string(), "mrm_stream");
        assert_eq!(EntryPoint::from_name("mrm_eval"), None);
    }

    #[test]
    fn test_register_installs_every_entry_point() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let mut table = FunctionTable::new();
        register(bridge(&rt), &mut table).unwrap();

        assert_eq!(
            table.names(),
            vec!["mrm_generate", "mrm_generate_streamed", "mrm_parse", "mrm_stream"]
        );

        let parsed = table.call("mrm_parse", &[HostValue::from("x^2+0x")]).unwrap();
        assert_eq!(
            parsed.as_json(),
            Some(r#"{"success":true,"latex":"x^{2}","symbols":["x"]}"#)
        );
        assert!(table.call("mrm_eval", &[]).is_err());
    }

    #[test]
    fn test_register_twice_is_rejected() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let mut table = FunctionTable::new();
        register(bridge(&rt), &mut table).unwrap();

        let err = register(bridge(&rt), &mut table).unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }
}
