use crate::config::ConverterConfig;
use crate::converters::{Converter, structural_to_engine, structural_to_host, validate_depth};
use crate::core::{Engine, EngineValue};
use crate::error::BridgeError;
use crate::host::HostValue;
use crate::proxy::create_proxy;

/// Converter that hands host objects to script code as live proxies.
///
/// Maps, sets and lists are proxied when the matching flag is enabled; host objects and classes
/// without a structural form are always proxied.
#[derive(Clone, Debug, Default)]
pub struct ProxyConverter {
    config: ConverterConfig,
}

impl ProxyConverter {
    pub fn new() -> Self {
        ProxyConverter::default()
    }

    pub fn with_config(config: ConverterConfig) -> Self {
        ProxyConverter { config }
    }

    pub fn config_mut(&mut self) -> &mut ConverterConfig {
        &mut self.config
    }

    /// Proxies `value` unconditionally.
    pub fn to_proxy(&self, engine: &dyn Engine, value: &HostValue) -> Result<EngineValue, BridgeError> {
        create_proxy(engine, value)
    }
}

impl Converter for ProxyConverter {
    fn config(&self) -> &ConverterConfig {
        &self.config
    }

    fn to_host_at(&self, engine: &dyn Engine, value: &EngineValue, depth: usize) -> Result<HostValue, BridgeError> {
        structural_to_host(self, engine, value, depth)
    }

    fn to_engine_at(&self, engine: &dyn Engine, value: &HostValue, depth: usize) -> Result<EngineValue, BridgeError> {
        proxy_to_engine(self, engine, value, depth)
    }
}

pub(crate) fn proxy_to_engine(outer: &dyn Converter, engine: &dyn Engine, value: &HostValue, depth: usize) -> Result<EngineValue, BridgeError> {
    validate_depth(outer.config(), depth)?;
    let config = outer.config();
    let forced = match value {
        HostValue::Map(_) => config.proxy_map_enabled(),
        HostValue::Set(_) => config.proxy_set_enabled(),
        HostValue::List(_) => config.proxy_list_enabled(),
        _ => false,
    };
    if forced {
        return create_proxy(engine, value);
    }
    let structural = structural_to_engine(outer, engine, value, depth)?;
    if structural.is_undefined() && matches!(value, HostValue::Object(_) | HostValue::Class(_)) {
        return create_proxy(engine, value);
    }
    Ok(structural)
}
