// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Time-dependent operators.
//!
//! A [`TimeArray`] is an operator-valued function of time with shape
//! `(...batch, n, n)`. Variants:
//!
//! - **Constant**: a fixed (possibly batched) array.
//! - **Pwc**: `values[..., k] * array` on `[times[k], times[k+1])`, zero
//!   outside the breakpoints.
//! - **Modulated**: `f(t) * array` where `f(t)` returns batch-shaped
//!   coefficients.
//! - **Callable**: an arbitrary `t -> (...batch, n, n)` function.
//! - **Summed**: a sum of the above, batched by broadcasting.
//!
//! Instances are immutable; reshaping operations return new instances.

use std::fmt;
use std::sync::Arc;

use ndarray::{Array2, ArrayD, Axis, Dimension, IxDyn};
use num_complex::Complex64;

use crate::error::{Error, Result, ValidationError};
use crate::linalg::first_matrix;

/// Batch-shaped coefficient function of a modulated operator.
pub type CoefficientFn = Arc<dyn Fn(f64) -> ArrayD<Complex64> + Send + Sync>;

/// Operator-valued function of a callable operator.
pub type OperatorFn = Arc<dyn Fn(f64) -> ArrayD<Complex64> + Send + Sync>;

/// Operator-valued function of time.
#[derive(Clone)]
pub enum TimeArray {
    /// Time-independent operator, shape `(...b, n, n)`.
    Constant { array: ArrayD<Complex64> },
    /// Piecewise-constant operator.
    Pwc {
        /// `N + 1` strictly increasing breakpoints.
        times: Vec<f64>,
        /// Segment values, shape `(...b, N)`.
        values: ArrayD<Complex64>,
        array: Array2<Complex64>,
    },
    /// Operator modulated by a time-dependent envelope.
    Modulated {
        f: CoefficientFn,
        batch: Vec<usize>,
        array: Array2<Complex64>,
    },
    /// Arbitrary function of time.
    Callable { f: OperatorFn, shape: Vec<usize> },
    /// Sum of time arrays.
    Summed {
        terms: Vec<TimeArray>,
        batch: Vec<usize>,
    },
}

impl TimeArray {
    /// Constant operator from a batched array `(...b, n, n)`.
    pub fn constant(array: ArrayD<Complex64>) -> Result<Self> {
        check_square("array", array.shape())?;
        Ok(TimeArray::Constant { array })
    }

    /// Constant unbatched operator.
    pub fn from_matrix(matrix: Array2<Complex64>) -> Self {
        TimeArray::Constant {
            array: matrix.into_dyn(),
        }
    }

    /// Constant operator batched over a list of matrices of equal shape.
    pub fn stack(matrices: &[Array2<Complex64>]) -> Result<Self> {
        let views: Vec<_> = matrices.iter().map(|m| m.view()).collect();
        let stacked = ndarray::stack(Axis(0), &views)
            .map_err(|e| ValidationError::field("matrices", e.to_string()))?;
        Self::constant(stacked.into_dyn())
    }

    /// Piecewise-constant operator `values[..., k] * array` on
    /// `[times[k], times[k+1])`.
    pub fn pwc(times: Vec<f64>, values: ArrayD<Complex64>, array: Array2<Complex64>) -> Result<Self> {
        if times.len() < 2 {
            return Err(ValidationError::field("times", "needs at least two breakpoints").into());
        }
        if times.iter().any(|t| !t.is_finite()) || times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(
                ValidationError::field("times", "must be finite and strictly increasing").into(),
            );
        }
        let nseg = values.shape().last().copied().unwrap_or(0);
        if values.ndim() == 0 || nseg != times.len() - 1 {
            return Err(ValidationError::field(
                "values",
                format!(
                    "last axis must have {} entries, got shape {:?}",
                    times.len() - 1,
                    values.shape()
                ),
            )
            .into());
        }
        check_square("array", array.shape())?;
        Ok(TimeArray::Pwc {
            times,
            values,
            array,
        })
    }

    /// Operator `f(t) * array`. The batch shape is read from `f(0)`.
    pub fn modulated(
        f: impl Fn(f64) -> ArrayD<Complex64> + Send + Sync + 'static,
        array: Array2<Complex64>,
    ) -> Result<Self> {
        check_square("array", array.shape())?;
        let batch = f(0.0).shape().to_vec();
        Ok(TimeArray::Modulated {
            f: Arc::new(f),
            batch,
            array,
        })
    }

    /// Unbatched operator `f(t) * array` with a scalar envelope.
    pub fn modulated_scalar(
        f: impl Fn(f64) -> Complex64 + Send + Sync + 'static,
        array: Array2<Complex64>,
    ) -> Self {
        TimeArray::Modulated {
            f: Arc::new(move |t| ArrayD::from_elem(IxDyn(&[]), f(t))),
            batch: Vec::new(),
            array,
        }
    }

    /// Arbitrary operator function. The shape is read from `f(0)`.
    pub fn callable(f: impl Fn(f64) -> ArrayD<Complex64> + Send + Sync + 'static) -> Result<Self> {
        let shape = f(0.0).shape().to_vec();
        check_square("f(0)", &shape)?;
        Ok(TimeArray::Callable {
            f: Arc::new(f),
            shape,
        })
    }

    /// Sum of time arrays, batched by broadcasting.
    pub fn sum(terms: Vec<TimeArray>) -> Result<Self> {
        let Some(first) = terms.first() else {
            return Err(ValidationError::field("terms", "cannot sum zero operators").into());
        };
        let n = first.dim();
        let mut batch = Vec::new();
        let mut flat = Vec::with_capacity(terms.len());
        for term in terms {
            if term.dim() != n {
                return Err(ValidationError::field(
                    "terms",
                    format!("dimension mismatch: {} vs {}", term.dim(), n),
                )
                .into());
            }
            batch = broadcast_shapes(&batch, &term.batch_shape())?;
            match term {
                TimeArray::Summed { terms, .. } => flat.extend(terms),
                other => flat.push(other),
            }
        }
        Ok(TimeArray::Summed { terms: flat, batch })
    }

    /// `self + other`.
    pub fn plus(self, other: TimeArray) -> Result<Self> {
        Self::sum(vec![self, other])
    }

    /// Leading batch shape.
    pub fn batch_shape(&self) -> Vec<usize> {
        match self {
            TimeArray::Constant { array } => array.shape()[..array.ndim() - 2].to_vec(),
            TimeArray::Pwc { values, .. } => values.shape()[..values.ndim() - 1].to_vec(),
            TimeArray::Modulated { batch, .. } | TimeArray::Summed { batch, .. } => batch.clone(),
            TimeArray::Callable { shape, .. } => shape[..shape.len() - 2].to_vec(),
        }
    }

    /// Hilbert space dimension `n`.
    pub fn dim(&self) -> usize {
        match self {
            TimeArray::Constant { array } => array.shape()[array.ndim() - 1],
            TimeArray::Pwc { array, .. } | TimeArray::Modulated { array, .. } => array.nrows(),
            TimeArray::Callable { shape, .. } => shape[shape.len() - 1],
            TimeArray::Summed { terms, .. } => terms.first().map_or(0, |t| t.dim()),
        }
    }

    /// Full shape `(...batch, n, n)`.
    pub fn shape(&self) -> Vec<usize> {
        let mut shape = self.batch_shape();
        shape.extend([self.dim(), self.dim()]);
        shape
    }

    /// Evaluate the full batched array at time `t`.
    ///
    /// Fails when a callable or a summed term returns an array that does
    /// not broadcast to [`TimeArray::shape`].
    pub fn eval(&self, t: f64) -> Result<ArrayD<Complex64>> {
        let value = match self {
            TimeArray::Constant { array } => array.clone(),
            TimeArray::Pwc {
                times,
                values,
                array,
            } => match segment(times, t) {
                Some(k) => outer(&values.index_axis(Axis(values.ndim() - 1), k).to_owned(), array),
                None => ArrayD::zeros(IxDyn(&self.shape())),
            },
            TimeArray::Modulated { f, array, .. } => outer(&f(t), array),
            TimeArray::Callable { f, shape } => {
                let value = f(t);
                if value.shape() != shape.as_slice() {
                    return Err(shape_error(value.shape(), shape, t));
                }
                value
            }
            TimeArray::Summed { terms, .. } => {
                let shape = self.shape();
                let mut total = ArrayD::zeros(IxDyn(&shape));
                for term in terms {
                    let value = term.eval(t)?;
                    let view = value
                        .broadcast(IxDyn(&shape))
                        .ok_or_else(|| shape_error(value.shape(), &shape, t))?;
                    total += &view;
                }
                total
            }
        };
        Ok(value)
    }

    /// Evaluate an unbatched operator at time `t`.
    ///
    /// For batched operators this returns the first batch element; callers
    /// select an element with [`TimeArray::select`] first.
    pub fn at(&self, t: f64) -> Array2<Complex64> {
        match self {
            TimeArray::Constant { array } => first_matrix(array.clone()),
            TimeArray::Pwc {
                times,
                values,
                array,
            } => match segment(times, t) {
                Some(k) => {
                    let coef = values
                        .index_axis(Axis(values.ndim() - 1), k)
                        .iter()
                        .next()
                        .copied()
                        .unwrap_or_default();
                    array * coef
                }
                None => Array2::zeros(array.raw_dim()),
            },
            TimeArray::Modulated { f, array, .. } => {
                array * f(t).iter().next().copied().unwrap_or_default()
            }
            TimeArray::Callable { f, .. } => first_matrix(f(t)),
            TimeArray::Summed { terms, .. } => {
                let n = self.dim();
                terms
                    .iter()
                    .fold(Array2::zeros((n, n)), |acc, term| acc + term.at(t))
            }
        }
    }

    /// Sorted, distinct times where the operator may jump.
    pub fn discontinuity_ts(&self) -> Vec<f64> {
        match self {
            TimeArray::Pwc { times, .. } => times.clone(),
            TimeArray::Summed { terms, .. } => {
                merge_times(terms.iter().flat_map(|t| t.discontinuity_ts()))
            }
            _ => Vec::new(),
        }
    }

    /// Whether the operator is constant, piecewise constant, or a sum of such.
    pub fn is_piecewise_constant(&self) -> bool {
        match self {
            TimeArray::Constant { .. } | TimeArray::Pwc { .. } => true,
            TimeArray::Summed { terms, .. } => terms.iter().all(|t| t.is_piecewise_constant()),
            _ => false,
        }
    }

    /// Multiply by a complex scalar.
    pub fn scale(&self, factor: Complex64) -> TimeArray {
        match self {
            TimeArray::Constant { array } => TimeArray::Constant {
                array: array * factor,
            },
            TimeArray::Pwc {
                times,
                values,
                array,
            } => TimeArray::Pwc {
                times: times.clone(),
                values: values * factor,
                array: array.clone(),
            },
            TimeArray::Modulated { f, batch, array } => {
                let f = f.clone();
                TimeArray::Modulated {
                    f: Arc::new(move |t| f(t) * factor),
                    batch: batch.clone(),
                    array: array.clone(),
                }
            }
            TimeArray::Callable { f, shape } => {
                let f = f.clone();
                TimeArray::Callable {
                    f: Arc::new(move |t| f(t) * factor),
                    shape: shape.clone(),
                }
            }
            TimeArray::Summed { terms, batch } => TimeArray::Summed {
                terms: terms.iter().map(|t| t.scale(factor)).collect(),
                batch: batch.clone(),
            },
        }
    }

    /// Broadcast the batch shape to `batch` following the usual rules on
    /// leading dimensions.
    pub fn broadcast_to(&self, batch: &[usize]) -> Result<TimeArray> {
        let own = self.batch_shape();
        if broadcast_shapes(&own, batch)? != batch {
            return Err(ValidationError::field(
                "batch",
                format!("cannot broadcast {:?} to {:?}", own, batch),
            )
            .into());
        }
        let n = self.dim();
        let out = match self {
            TimeArray::Constant { array } => {
                let full: Vec<usize> = batch.iter().copied().chain([n, n]).collect();
                TimeArray::Constant {
                    array: broadcast_owned(array, &full)?,
                }
            }
            TimeArray::Pwc {
                times,
                values,
                array,
            } => {
                let full: Vec<usize> = batch.iter().copied().chain([times.len() - 1]).collect();
                TimeArray::Pwc {
                    times: times.clone(),
                    values: broadcast_owned(values, &full)?,
                    array: array.clone(),
                }
            }
            TimeArray::Modulated { f, array, .. } => {
                let f = f.clone();
                let target = batch.to_vec();
                TimeArray::Modulated {
                    f: Arc::new(move |t| broadcast_or_keep(f(t), &target)),
                    batch: batch.to_vec(),
                    array: array.clone(),
                }
            }
            TimeArray::Callable { f, .. } => {
                let f = f.clone();
                let full: Vec<usize> = batch.iter().copied().chain([n, n]).collect();
                let target = full.clone();
                TimeArray::Callable {
                    f: Arc::new(move |t| broadcast_or_keep(f(t), &target)),
                    shape: full,
                }
            }
            TimeArray::Summed { terms, .. } => TimeArray::Summed {
                terms: terms
                    .iter()
                    .map(|t| t.broadcast_to(batch))
                    .collect::<Result<_>>()?,
                batch: batch.to_vec(),
            },
        };
        Ok(out)
    }

    /// Select one batch element.
    ///
    /// `index` is matched against the trailing batch axes (right-aligned);
    /// axes of size one are broadcast.
    pub fn select(&self, index: &[usize]) -> TimeArray {
        let nb = self.batch_shape().len();
        let tail: Vec<usize> = index[index.len().saturating_sub(nb)..].to_vec();
        match self {
            TimeArray::Constant { array } => TimeArray::Constant {
                array: take_batch(array.clone(), &tail),
            },
            TimeArray::Pwc {
                times,
                values,
                array,
            } => TimeArray::Pwc {
                times: times.clone(),
                values: take_batch(values.clone(), &tail),
                array: array.clone(),
            },
            TimeArray::Modulated { f, array, .. } => {
                let f = f.clone();
                TimeArray::Modulated {
                    f: Arc::new(move |t| take_batch(f(t), &tail)),
                    batch: Vec::new(),
                    array: array.clone(),
                }
            }
            TimeArray::Callable { f, shape } => {
                let f = f.clone();
                let n = shape[shape.len() - 1];
                TimeArray::Callable {
                    f: Arc::new(move |t| take_batch(f(t), &tail)),
                    shape: vec![n, n],
                }
            }
            TimeArray::Summed { terms, .. } => TimeArray::Summed {
                terms: terms.iter().map(|t| t.select(&tail)).collect(),
                batch: Vec::new(),
            },
        }
    }
}

impl fmt::Debug for TimeArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            TimeArray::Constant { .. } => "ConstantTimeArray",
            TimeArray::Pwc { .. } => "PwcTimeArray",
            TimeArray::Modulated { .. } => "ModulatedTimeArray",
            TimeArray::Callable { .. } => "CallableTimeArray",
            TimeArray::Summed { .. } => "SummedTimeArray",
        };
        write!(f, "{}(shape={:?})", kind, self.shape())
    }
}

impl From<Array2<Complex64>> for TimeArray {
    fn from(matrix: Array2<Complex64>) -> Self {
        TimeArray::from_matrix(matrix)
    }
}

/// Broadcast two batch shapes (numpy rules, right-aligned).
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let n = a.len().max(b.len());
    let mut out = vec![1; n];
    for i in 0..n {
        let da = if i + a.len() >= n { a[i + a.len() - n] } else { 1 };
        let db = if i + b.len() >= n { b[i + b.len() - n] } else { 1 };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            (x, y) => {
                return Err(ValidationError::field(
                    "batch",
                    format!("incompatible batch shapes {:?} and {:?} ({} vs {})", a, b, x, y),
                )
                .into())
            }
        };
    }
    Ok(out)
}

/// Merge time sequences into a sorted, distinct list.
pub(crate) fn merge_times(times: impl IntoIterator<Item = f64>) -> Vec<f64> {
    let mut all: Vec<f64> = times.into_iter().filter(|t| t.is_finite()).collect();
    all.sort_by(f64::total_cmp);
    all.dedup_by(|a, b| (*a - *b).abs() <= 1e-14 * b.abs().max(1.0));
    all
}

fn shape_error(got: &[usize], expected: &[usize], t: f64) -> Error {
    ValidationError::field(
        "time_array",
        format!("value at t = {} has shape {:?}, expected {:?}", t, got, expected),
    )
    .into()
}

fn check_square(field: &str, shape: &[usize]) -> Result<()> {
    let nd = shape.len();
    if nd < 2 || shape[nd - 1] != shape[nd - 2] {
        return Err(ValidationError::field(
            field,
            format!("expected shape (..., n, n), got {:?}", shape),
        )
        .into());
    }
    Ok(())
}

/// Index of the segment `[times[k], times[k+1])` containing `t`.
fn segment(times: &[f64], t: f64) -> Option<usize> {
    let idx = times.partition_point(|&x| x <= t);
    (idx >= 1 && idx < times.len()).then(|| idx - 1)
}

/// `coef[...b] * array` as a `(...b, n, n)` array.
fn outer(coef: &ArrayD<Complex64>, array: &Array2<Complex64>) -> ArrayD<Complex64> {
    let mut shape = coef.shape().to_vec();
    let nb = shape.len();
    shape.extend(array.shape());
    ArrayD::from_shape_fn(IxDyn(&shape), |idx| {
        let k = idx.slice();
        coef[&k[..nb]] * array[[k[nb], k[nb + 1]]]
    })
}

fn broadcast_owned(a: &ArrayD<Complex64>, shape: &[usize]) -> Result<ArrayD<Complex64>> {
    a.broadcast(IxDyn(shape))
        .map(|v| v.to_owned())
        .ok_or_else(|| {
            ValidationError::field(
                "batch",
                format!("cannot broadcast {:?} to {:?}", a.shape(), shape),
            )
            .into()
        })
}

fn broadcast_or_keep(a: ArrayD<Complex64>, shape: &[usize]) -> ArrayD<Complex64> {
    match a.broadcast(IxDyn(shape)) {
        Some(v) => v.to_owned(),
        None => a,
    }
}

/// Index the leading axes of `a` with `index`; size-one axes broadcast.
fn take_batch(mut a: ArrayD<Complex64>, index: &[usize]) -> ArrayD<Complex64> {
    for &i in index {
        let size = a.shape()[0];
        let i = if size == 1 { 0 } else { i.min(size - 1) };
        a = a.index_axis_move(Axis(0), i);
    }
    a
}
