//! Cache keys derived from call arguments.

use crate::error::{Result, TuneError};
use crate::identity::hash_list;
use serde::{Deserialize, Serialize};
use std::fmt;
use tunecache_kernels::{Arg, KernelArgs, ParamValue, Params, Scalar};

/// One typed component of a cache key.
///
/// Floats are keyed by bit pattern, so `0.0` and `-0.0` are distinct keys
/// and a NaN matches only the identical NaN payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum KeyPart {
    Int(i64),
    FloatBits(u64),
    Bool(bool),
    Str(String),
    Shape(Vec<usize>),
    DType(String),
}

impl KeyPart {
    fn from_scalar(scalar: &Scalar) -> Self {
        match scalar {
            Scalar::Int(v) => KeyPart::Int(*v),
            Scalar::Float(v) => KeyPart::FloatBits(v.to_bits()),
            Scalar::Bool(v) => KeyPart::Bool(*v),
            Scalar::Str(v) => KeyPart::Str(v.clone()),
        }
    }

    fn from_param(value: &ParamValue) -> Self {
        match value {
            ParamValue::Int(v) => KeyPart::Int(*v),
            ParamValue::Bool(v) => KeyPart::Bool(*v),
            ParamValue::Str(v) => KeyPart::Str(v.clone()),
        }
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Int(v) => write!(f, "{v}"),
            KeyPart::FloatBits(bits) => write!(f, "{}", f64::from_bits(*bits)),
            KeyPart::Bool(v) => write!(f, "{v}"),
            KeyPart::Str(v) => write!(f, "'{v}'"),
            KeyPart::Shape(dims) => write!(f, "{dims:?}"),
            KeyPart::DType(dtype) => write!(f, "'{dtype}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(pub Vec<KeyPart>);

impl CacheKey {
    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// Ordered names of the arguments whose values select a cached decision.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeySpec {
    names: Vec<String>,
}

impl KeySpec {
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn identity_hash(&self) -> String {
        hash_list(&self.names)
    }

    pub fn validate(&self, kernel: &str, arg_names: &[&str]) -> Result<()> {
        for name in &self.names {
            if !arg_names.contains(&name.as_str()) {
                return Err(TuneError::UnknownArgument {
                    kernel: kernel.to_string(),
                    name: name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Key-argument values in declared key order, then the element type of every
    /// argument that has one, in declaration order. Positional arguments shadow
    /// call kwargs of the same name; tensors named in the key contribute their
    /// shape.
    pub fn derive(&self, args: &KernelArgs, kwargs: &Params) -> Result<CacheKey> {
        let mut parts = Vec::with_capacity(self.names.len() + args.len());
        for name in &self.names {
            let part = match (args.get(name), kwargs.get(name)) {
                (Some(Arg::Scalar(scalar)), _) => KeyPart::from_scalar(scalar),
                (Some(Arg::Tensor(tensor)), _) => KeyPart::Shape(tensor.shape()),
                (None, Some(value)) => KeyPart::from_param(value),
                (None, None) => return Err(TuneError::MissingKeyArgument(name.clone())),
            };
            parts.push(part);
        }
        for (_, arg) in args.iter() {
            if let Some(dtype) = arg.dtype() {
                parts.push(KeyPart::DType(dtype.to_string()));
            }
        }
        Ok(CacheKey(parts))
    }
}
