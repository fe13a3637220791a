use crate::config::{ConverterConfig, ScalarKind};
use crate::converters::{Converter, validate_depth};
use crate::core::{Engine, EngineValue};
use crate::error::BridgeError;
use crate::host::HostValue;
use num_traits::ToPrimitive;

/// Scalar-only converter. References pass through untouched as [`HostValue::Engine`].
#[derive(Clone, Debug, Default)]
pub struct PrimitiveConverter {
    config: ConverterConfig,
}

impl PrimitiveConverter {
    pub fn new() -> Self {
        PrimitiveConverter::default()
    }

    pub fn with_config(config: ConverterConfig) -> Self {
        PrimitiveConverter { config }
    }

    pub fn config_mut(&mut self) -> &mut ConverterConfig {
        &mut self.config
    }
}

impl Converter for PrimitiveConverter {
    fn config(&self) -> &ConverterConfig {
        &self.config
    }

    fn to_host_at(&self, engine: &dyn Engine, value: &EngineValue, depth: usize) -> Result<HostValue, BridgeError> {
        match scalar_to_host(self, value, depth)? {
            Some(host) => Ok(host),
            None => Ok(HostValue::Engine(engine.duplicate(value)?)),
        }
    }

    fn to_engine_at(&self, engine: &dyn Engine, value: &HostValue, depth: usize) -> Result<EngineValue, BridgeError> {
        scalar_to_engine(self, engine, value, depth)
    }
}

/// Maps scalar engine values. Returns `None` for references, which a structural layer handles.
pub(crate) fn scalar_to_host(outer: &dyn Converter, value: &EngineValue, depth: usize) -> Result<Option<HostValue>, BridgeError> {
    validate_depth(outer.config(), depth)?;
    Ok(match value {
        EngineValue::Undefined | EngineValue::Null => Some(HostValue::Null),
        EngineValue::Boolean(b) => Some(HostValue::Boolean(*b)),
        EngineValue::Integer(i) => Some(HostValue::Integer(*i)),
        EngineValue::Long(l) => Some(HostValue::Long(*l)),
        EngineValue::Double(d) => Some(HostValue::Double(*d)),
        EngineValue::String(s) => Some(HostValue::String(s.clone())),
        EngineValue::BigInt(b) => Some(HostValue::BigInt(b.clone())),
        EngineValue::Date(ms) => Some(chrono::DateTime::from_timestamp_millis(*ms).map_or(HostValue::Null, HostValue::DateTime)),
        EngineValue::Reference(_) => None,
    })
}

/// Maps host scalars. Anything this layer does not handle comes back as `Undefined`.
pub(crate) fn scalar_to_engine(outer: &dyn Converter, engine: &dyn Engine, value: &HostValue, depth: usize) -> Result<EngineValue, BridgeError> {
    validate_depth(outer.config(), depth)?;
    Ok(match value {
        HostValue::Null | HostValue::Optional(None) => EngineValue::Null,
        HostValue::Optional(Some(inner)) => return outer.to_engine_at(engine, inner, depth),
        HostValue::Boolean(b) => EngineValue::Boolean(*b),
        HostValue::Byte(v) => EngineValue::Integer(*v as i32),
        HostValue::Short(v) => EngineValue::Integer(*v as i32),
        HostValue::Integer(v) => EngineValue::Integer(*v),
        HostValue::Long(v) => EngineValue::Long(*v),
        HostValue::Float(v) => EngineValue::Double(*v as f64),
        HostValue::Double(v) => EngineValue::Double(*v),
        HostValue::Char(c) => EngineValue::String(c.to_string()),
        HostValue::String(s) => EngineValue::String(s.clone()),
        HostValue::BigInt(b) => EngineValue::BigInt(b.clone()),
        HostValue::DateTime(dt) => EngineValue::Date(dt.timestamp_millis()),
        HostValue::Engine(v) => engine.duplicate(v)?,
        _ => EngineValue::Undefined,
    })
}

pub(crate) fn coerce_scalar(config: &ConverterConfig, value: &EngineValue, kind: ScalarKind) -> HostValue {
    let defaults = config.default_scalars();
    if value.is_null_or_undefined() {
        return defaults.value_of(kind);
    }
    let number = match value {
        EngineValue::Integer(i) => Some(*i as f64),
        EngineValue::Long(l) => Some(*l as f64),
        EngineValue::Double(d) => Some(*d),
        EngineValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
        EngineValue::BigInt(b) => b.to_f64(),
        EngineValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| !n.is_nan());
    match kind {
        ScalarKind::Boolean => HostValue::Boolean(value.is_truthy()),
        ScalarKind::Char => match value {
            EngineValue::String(s) => s.chars().next().map_or(defaults.value_of(kind), HostValue::Char),
            _ => defaults.value_of(kind),
        },
        ScalarKind::Byte => number.map_or(defaults.value_of(kind), |n| HostValue::Byte(n as i8)),
        ScalarKind::Short => number.map_or(defaults.value_of(kind), |n| HostValue::Short(n as i16)),
        ScalarKind::Integer => number.map_or(defaults.value_of(kind), |n| HostValue::Integer(n as i32)),
        ScalarKind::Long => match value {
            EngineValue::Long(l) => HostValue::Long(*l),
            EngineValue::BigInt(b) => b.to_i64().map_or(defaults.value_of(kind), HostValue::Long),
            _ => number.map_or(defaults.value_of(kind), |n| HostValue::Long(n as i64)),
        },
        ScalarKind::Float => number.map_or(defaults.value_of(kind), |n| HostValue::Float(n as f32)),
        ScalarKind::Double => number.map_or(defaults.value_of(kind), HostValue::Double),
    }
}
