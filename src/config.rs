use crate::error::BridgeError;
use crate::host::HostValue;
use crate::registry::CustomObjectRegistry;
use std::sync::Arc;

pub const DEFAULT_MAX_DEPTH: usize = 20;

/// Host scalar kinds with a configurable default.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Boolean,
    Byte,
    Char,
    Double,
    Float,
    Integer,
    Long,
    Short,
}

/// Values used when an engine value cannot be coerced to the requested scalar kind.
#[derive(Clone, Debug, PartialEq)]
pub struct DefaultScalars {
    pub boolean: bool,
    pub byte: i8,
    pub char: char,
    pub double: f64,
    pub float: f32,
    pub integer: i32,
    pub long: i64,
    pub short: i16,
}

impl Default for DefaultScalars {
    fn default() -> Self {
        DefaultScalars {
            boolean: false,
            byte: 0,
            char: '\0',
            double: 0.0,
            float: 0.0,
            integer: 0,
            long: 0,
            short: 0,
        }
    }
}

impl DefaultScalars {
    pub fn value_of(&self, kind: ScalarKind) -> HostValue {
        match kind {
            ScalarKind::Boolean => HostValue::Boolean(self.boolean),
            ScalarKind::Byte => HostValue::Byte(self.byte),
            ScalarKind::Char => HostValue::Char(self.char),
            ScalarKind::Double => HostValue::Double(self.double),
            ScalarKind::Float => HostValue::Float(self.float),
            ScalarKind::Integer => HostValue::Integer(self.integer),
            ScalarKind::Long => HostValue::Long(self.long),
            ScalarKind::Short => HostValue::Short(self.short),
        }
    }
}

/// Settings shared by every layer of a converter.
///
/// Clones share the same custom object registry.
#[derive(Clone, Debug)]
pub struct ConverterConfig {
    max_depth: usize,
    default_scalars: DefaultScalars,
    registry: Arc<CustomObjectRegistry>,
    proxy_map_enabled: bool,
    proxy_set_enabled: bool,
    proxy_list_enabled: bool,
    skip_functions_in_object: bool,
    extract_function_source: bool,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        ConverterConfig {
            max_depth: DEFAULT_MAX_DEPTH,
            default_scalars: DefaultScalars::default(),
            registry: Arc::new(CustomObjectRegistry::new()),
            proxy_map_enabled: false,
            proxy_set_enabled: false,
            proxy_list_enabled: false,
            skip_functions_in_object: true,
            extract_function_source: false,
        }
    }
}

impl ConverterConfig {
    pub fn new() -> Self {
        ConverterConfig::default()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn set_max_depth(&mut self, max_depth: usize) -> Result<&mut Self, BridgeError> {
        if max_depth == 0 {
            return Err(BridgeError::converter("max depth must be at least 1"));
        }
        self.max_depth = max_depth;
        Ok(self)
    }

    pub fn default_scalars(&self) -> &DefaultScalars {
        &self.default_scalars
    }

    pub fn default_scalars_mut(&mut self) -> &mut DefaultScalars {
        &mut self.default_scalars
    }

    pub fn registry(&self) -> &Arc<CustomObjectRegistry> {
        &self.registry
    }

    /// Replaces the registry, e.g. to share one between several converters.
    pub fn set_registry(&mut self, registry: Arc<CustomObjectRegistry>) -> &mut Self {
        self.registry = registry;
        self
    }

    pub fn proxy_map_enabled(&self) -> bool {
        self.proxy_map_enabled
    }

    pub fn set_proxy_map_enabled(&mut self, enabled: bool) -> &mut Self {
        self.proxy_map_enabled = enabled;
        self
    }

    pub fn proxy_set_enabled(&self) -> bool {
        self.proxy_set_enabled
    }

    pub fn set_proxy_set_enabled(&mut self, enabled: bool) -> &mut Self {
        self.proxy_set_enabled = enabled;
        self
    }

    pub fn proxy_list_enabled(&self) -> bool {
        self.proxy_list_enabled
    }

    pub fn set_proxy_list_enabled(&mut self, enabled: bool) -> &mut Self {
        self.proxy_list_enabled = enabled;
        self
    }

    pub fn skip_functions_in_object(&self) -> bool {
        self.skip_functions_in_object
    }

    pub fn set_skip_functions_in_object(&mut self, skip: bool) -> &mut Self {
        self.skip_functions_in_object = skip;
        self
    }

    pub fn extract_function_source(&self) -> bool {
        self.extract_function_source
    }

    pub fn set_extract_function_source(&mut self, extract: bool) -> &mut Self {
        self.extract_function_source = extract;
        self
    }
}
