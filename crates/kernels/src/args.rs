//! Runtime arguments handed to kernels.

use crate::config::{DataType, ParamValue, Params};
use anyhow::{anyhow, Result};
use ndarray::{Array1, ArrayD, IxDyn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared, mutable device-style buffer with an element type tag.
///
/// Clones share storage, so a kernel or hook writing through one handle is
/// visible through every other handle to the same tensor.
#[derive(Debug, Clone)]
pub struct Tensor {
    dtype: DataType,
    data: Arc<Mutex<ArrayD<f32>>>,
}

impl Tensor {
    pub fn new(dtype: DataType, data: ArrayD<f32>) -> Self {
        Self {
            dtype,
            data: Arc::new(Mutex::new(data)),
        }
    }

    pub fn from_vec(dtype: DataType, values: Vec<f32>) -> Self {
        Self::new(dtype, Array1::from_vec(values).into_dyn())
    }

    pub fn from_shape_vec(dtype: DataType, shape: &[usize], values: Vec<f32>) -> Result<Self> {
        let data = ArrayD::from_shape_vec(IxDyn(shape), values)?;
        Ok(Self::new(dtype, data))
    }

    pub fn zeros(dtype: DataType, shape: &[usize]) -> Self {
        Self::new(dtype, ArrayD::zeros(IxDyn(shape)))
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn shape(&self) -> Vec<usize> {
        self.lock().shape().to_vec()
    }

    /// Owned copy of the current contents.
    pub fn snapshot(&self) -> ArrayD<f32> {
        self.lock().clone()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.lock().iter().copied().collect()
    }

    pub fn zero_(&self) {
        self.lock().fill(0.0);
    }

    pub fn copy_from(&self, source: &ArrayD<f32>) -> Result<()> {
        let mut data = self.lock();
        if data.shape() != source.shape() {
            return Err(anyhow!(
                "cannot copy shape {:?} into tensor of shape {:?}",
                source.shape(),
                data.shape()
            ));
        }
        data.assign(source);
        Ok(())
    }

    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut ArrayD<f32>) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn ptr_eq(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    fn lock(&self) -> MutexGuard<'_, ArrayD<f32>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl Scalar {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<usize> for Scalar {
    fn from(value: usize) -> Self {
        Scalar::Int(value as i64)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Str(value.to_string())
    }
}

#[derive(Debug, Clone)]
pub enum Arg {
    Tensor(Tensor),
    Scalar(Scalar),
}

impl Arg {
    /// Element type, for arguments that carry one.
    pub fn dtype(&self) -> Option<DataType> {
        match self {
            Arg::Tensor(tensor) => Some(tensor.dtype()),
            Arg::Scalar(_) => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Arg::Tensor(tensor) => Some(tensor),
            Arg::Scalar(_) => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Arg::Scalar(scalar) => Some(scalar),
            Arg::Tensor(_) => None,
        }
    }
}

/// Positional kernel arguments, each tagged with its declared name.
#[derive(Debug, Clone, Default)]
pub struct KernelArgs {
    entries: Vec<(String, Arg)>,
}

impl KernelArgs {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn tensor(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
        self.push(name, Arg::Tensor(tensor));
        self
    }

    pub fn scalar(mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.push(name, Arg::Scalar(value.into()));
        self
    }

    /// Appends an argument, replacing any earlier argument with the same name.
    pub fn push(&mut self, name: impl Into<String>, arg: Arg) {
        let name = name.into();
        if let Some(slot) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = arg;
        } else {
            self.entries.push((name, arg));
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arg> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, arg)| arg)
    }

    pub fn get_tensor(&self, name: &str) -> Result<&Tensor> {
        self.get(name)
            .and_then(Arg::as_tensor)
            .ok_or_else(|| anyhow!("argument `{name}` is not a tensor"))
    }

    pub fn get_int(&self, name: &str) -> Result<i64> {
        self.get(name)
            .and_then(Arg::as_scalar)
            .and_then(Scalar::as_int)
            .ok_or_else(|| anyhow!("argument `{name}` is not an integer"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arg)> {
        self.entries.iter().map(|(name, arg)| (name.as_str(), arg))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Arguments together with the merged meta-parameters of one launch.
#[derive(Debug, Clone, Copy)]
pub struct ArgView<'a> {
    pub args: &'a KernelArgs,
    pub params: &'a Params,
}

impl<'a> ArgView<'a> {
    pub fn new(args: &'a KernelArgs, params: &'a Params) -> Self {
        Self { args, params }
    }

    pub fn param(&self, name: &str) -> Option<&'a ParamValue> {
        self.params.get(name)
    }

    /// Integer lookup across meta-parameters first, then scalar arguments.
    pub fn int(&self, name: &str) -> Option<i64> {
        self.params
            .get(name)
            .and_then(ParamValue::as_int)
            .or_else(|| self.args.get_int(name).ok())
    }
}
