use num_bigint::BigInt;
use std::fmt;

/// Opaque handle to an engine-side reference value.
///
/// A handle is owned by whoever received it from the engine and must be released exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueHandle(pub u64);

/// Identifier of a native callback registered with the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(pub u64);

impl fmt::Display for ValueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A value living on the script-engine side of the boundary.
///
/// Scalars are carried inline; everything else is a [`ValueHandle`] into the engine heap.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineValue {
    Undefined,
    Null,
    Boolean(bool),
    Integer(i32),
    Long(i64),
    Double(f64),
    String(String),
    BigInt(BigInt),
    /// Milliseconds since the unix epoch.
    Date(i64),
    Reference(ValueHandle),
}

impl EngineValue {
    pub fn is_undefined(&self) -> bool {
        matches!(self, EngineValue::Undefined)
    }

    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, EngineValue::Undefined | EngineValue::Null)
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, EngineValue::Reference(_))
    }

    pub fn handle(&self) -> Option<ValueHandle> {
        match self {
            EngineValue::Reference(handle) => Some(*handle),
            _ => None,
        }
    }

    /// Numeric view used for index-like arguments. Non-numbers read as `None`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            EngineValue::Integer(i) => Some(*i as i64),
            EngineValue::Long(l) => Some(*l),
            EngineValue::Double(d) if d.is_finite() => Some(d.trunc() as i64),
            _ => None,
        }
    }

    /// Integer coercion for index arguments. Truncates toward zero and saturates at the `i64`
    /// bounds, so an infinity stays out of range instead of collapsing to 0. `undefined` yields
    /// `None`; NaN and values with no numeric reading yield 0.
    pub fn to_integer_or_infinity(&self) -> Option<i64> {
        let number = match self {
            EngineValue::Undefined => return None,
            EngineValue::Integer(i) => return Some(*i as i64),
            EngineValue::Long(l) => return Some(*l),
            EngineValue::Boolean(b) => return Some(*b as i64),
            EngineValue::Double(d) => *d,
            EngineValue::String(s) => match s.trim() {
                "" => 0.0,
                "Infinity" | "+Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                text => text.parse::<f64>().unwrap_or(f64::NAN),
            },
            _ => 0.0,
        };
        Some(number.trunc() as i64)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            EngineValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Truthiness of a scalar value. References are always truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            EngineValue::Undefined | EngineValue::Null => false,
            EngineValue::Boolean(b) => *b,
            EngineValue::Integer(i) => *i != 0,
            EngineValue::Long(l) => *l != 0,
            EngineValue::Double(d) => *d != 0.0 && !d.is_nan(),
            EngineValue::String(s) => !s.is_empty(),
            EngineValue::BigInt(b) => *b != BigInt::from(0),
            EngineValue::Date(_) | EngineValue::Reference(_) => true,
        }
    }
}

impl From<bool> for EngineValue {
    fn from(b: bool) -> Self {
        EngineValue::Boolean(b)
    }
}

impl From<i32> for EngineValue {
    fn from(i: i32) -> Self {
        EngineValue::Integer(i)
    }
}

impl From<f64> for EngineValue {
    fn from(d: f64) -> Self {
        EngineValue::Double(d)
    }
}

impl From<&str> for EngineValue {
    fn from(s: &str) -> Self {
        EngineValue::String(s.to_string())
    }
}

impl From<String> for EngineValue {
    fn from(s: String) -> Self {
        EngineValue::String(s)
    }
}

/// Shape of a reference value as reported by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Array,
    Object,
    Map,
    Set,
    WeakMap,
    TypedArray(TypedArrayKind),
    Function,
    Symbol,
    Proxy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypedArrayKind {
    Int8,
    Uint8,
    Uint8Clamped,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
    BigInt64,
    BigUint64,
}

impl TypedArrayKind {
    pub fn element_size(&self) -> usize {
        match self {
            TypedArrayKind::Int8 | TypedArrayKind::Uint8 | TypedArrayKind::Uint8Clamped => 1,
            TypedArrayKind::Int16 | TypedArrayKind::Uint16 => 2,
            TypedArrayKind::Int32 | TypedArrayKind::Uint32 | TypedArrayKind::Float32 => 4,
            TypedArrayKind::Float64 | TypedArrayKind::BigInt64 | TypedArrayKind::BigUint64 => 8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TypedArrayKind::Int8 => "Int8Array",
            TypedArrayKind::Uint8 => "Uint8Array",
            TypedArrayKind::Uint8Clamped => "Uint8ClampedArray",
            TypedArrayKind::Int16 => "Int16Array",
            TypedArrayKind::Uint16 => "Uint16Array",
            TypedArrayKind::Int32 => "Int32Array",
            TypedArrayKind::Uint32 => "Uint32Array",
            TypedArrayKind::Float32 => "Float32Array",
            TypedArrayKind::Float64 => "Float64Array",
            TypedArrayKind::BigInt64 => "BigInt64Array",
            TypedArrayKind::BigUint64 => "BigUint64Array",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FunctionType {
    /// Built into the engine.
    Native,
    /// Backed by a host callback.
    Api,
    /// Compiled from script source.
    UserDefined,
    #[default]
    Unknown,
}
