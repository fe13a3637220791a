use crate::config::ConverterConfig;
use crate::converters::{Converter, proxy_to_engine, structural_to_host, validate_depth, values_to_engine_array};
use crate::core::{Engine, EngineValue};
use crate::error::BridgeError;
use crate::host::HostValue;

/// Converter for full two-way bridging: every composite host value becomes a live proxy, and
/// machine arrays are marshaled element by element into plain script arrays.
#[derive(Clone, Debug)]
pub struct BridgeConverter {
    config: ConverterConfig,
}

impl Default for BridgeConverter {
    fn default() -> Self {
        let mut config = ConverterConfig::default();
        config
            .set_proxy_map_enabled(true)
            .set_proxy_set_enabled(true)
            .set_proxy_list_enabled(true);
        BridgeConverter { config }
    }
}

impl BridgeConverter {
    pub fn new() -> Self {
        BridgeConverter::default()
    }

    /// Uses `config` as given; the proxy flags are not forced on.
    pub fn with_config(config: ConverterConfig) -> Self {
        BridgeConverter { config }
    }

    pub fn config_mut(&mut self) -> &mut ConverterConfig {
        &mut self.config
    }
}

impl Converter for BridgeConverter {
    fn config(&self) -> &ConverterConfig {
        &self.config
    }

    fn to_host_at(&self, engine: &dyn Engine, value: &EngineValue, depth: usize) -> Result<HostValue, BridgeError> {
        structural_to_host(self, engine, value, depth)
    }

    fn to_engine_at(&self, engine: &dyn Engine, value: &HostValue, depth: usize) -> Result<EngineValue, BridgeError> {
        validate_depth(&self.config, depth)?;
        if let HostValue::Array(array) = value {
            return values_to_engine_array(self, engine, &array.to_values(), depth);
        }
        proxy_to_engine(self, engine, value, depth)
    }
}
