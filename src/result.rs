// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Result assembly.
//!
//! Per-trajectory outputs are stacked into batched arrays with the batch
//! axes leading. Axis conventions, for a batch shape `(...b)`:
//!
//! | quantity      | shape                                      |
//! |---------------|--------------------------------------------|
//! | states        | `(...b, ntsave, n, m)`, or `(...b, n, m)`  |
//! | expects       | `(...b, nE, ntsave)`                       |
//! | extra         | `(...b, ntsave, k)`                        |
//! | measurements  | `(...b, nLm, ntsave - 1)`                  |
//!
//! Unbatched calls have an empty batch shape, so no singleton axis shows
//! up. Results are built once and never mutated.

use std::fmt;

use ndarray::{Array1, ArrayD, Axis, IxDyn};
use num_complex::Complex64;

use crate::error::{Result, ValidationError};
use crate::gradient::{Gradient, Grads};
use crate::integrators::{Jump, Stats, TrajectoryOutput};
use crate::options::Options;
use crate::solver::Solver;

/// Call metadata echoed by every result.
#[derive(Debug, Clone)]
pub struct Metadata {
    pub tsave: Vec<f64>,
    pub solver: Solver,
    pub gradient: Option<Gradient>,
    pub options: Options,
    pub final_time: f64,
}

/// Batched solver statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Infos {
    /// Attempted steps, shape `(...b)`
    pub nsteps: ArrayD<usize>,
    pub naccepted: ArrayD<usize>,
    pub nrejected: ArrayD<usize>,
    /// Whether the step size was adaptive
    pub adaptive: bool,
}

impl Infos {
    pub(crate) fn from_stats(batch: &[usize], stats: &[Stats], adaptive: bool) -> Result<Self> {
        let collect = |f: fn(&Stats) -> usize| -> Result<ArrayD<usize>> {
            ArrayD::from_shape_vec(IxDyn(batch), stats.iter().map(f).collect())
                .map_err(|e| ValidationError::field("batch", e.to_string()).into())
        };
        Ok(Self {
            nsteps: collect(|s| s.nsteps)?,
            naccepted: collect(|s| s.naccepted)?,
            nrejected: collect(|s| s.nrejected)?,
            adaptive,
        })
    }
}

impl fmt::Display for Infos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mean = |a: &ArrayD<usize>| {
            a.iter().sum::<usize>() as f64 / a.len().max(1) as f64
        };
        let batched = self.nsteps.ndim() > 0;
        let prefix = if batched { "avg. " } else { "" };
        let number = |x: f64| {
            if batched {
                format!("{:.1}", x)
            } else {
                format!("{}", x)
            }
        };
        write!(f, "{}{} steps", prefix, number(mean(&self.nsteps)))?;
        if self.adaptive {
            write!(
                f,
                " ({} accepted, {} rejected)",
                number(mean(&self.naccepted)),
                number(mean(&self.nrejected))
            )?;
        }
        Ok(())
    }
}

/// Stack equally shaped arrays along new leading `batch` axes.
pub(crate) fn stack<T: Clone>(batch: &[usize], items: &[ArrayD<T>]) -> Result<ArrayD<T>> {
    let inner = items.first().map_or_else(Vec::new, |a| a.shape().to_vec());
    if let Some(bad) = items.iter().find(|a| a.shape() != inner.as_slice()) {
        return Err(ValidationError::field(
            "batch",
            format!("inconsistent element shapes {:?} and {:?}", inner, bad.shape()),
        )
        .into());
    }
    let shape: Vec<usize> = batch.iter().chain(&inner).copied().collect();
    let data: Vec<T> = items.iter().flat_map(|a| a.iter().cloned()).collect();
    ArrayD::from_shape_vec(IxDyn(&shape), data)
        .map_err(|e| ValidationError::field("batch", e.to_string()).into())
}

fn stack_grads(batch: &[usize], outputs: &[TrajectoryOutput]) -> Result<Option<Grads>> {
    let Some(grads) = outputs
        .iter()
        .map(|o| o.grads.as_ref())
        .collect::<Option<Vec<_>>>()
    else {
        return Ok(None);
    };
    if grads.is_empty() {
        return Ok(None);
    }
    let loss: Vec<ArrayD<f64>> = grads
        .iter()
        .map(|g| ArrayD::from_elem(IxDyn(&[]), g.loss))
        .collect();
    let params: Vec<ArrayD<f64>> = grads
        .iter()
        .map(|g| Array1::from(g.params.clone()).into_dyn())
        .collect();
    let y0: Vec<ArrayD<Complex64>> = grads.iter().map(|g| g.y0.clone().into_dyn()).collect();
    Ok(Some(Grads {
        loss: stack(batch, &loss)?,
        params: stack(batch, &params)?,
        y0: stack(batch, &y0)?,
    }))
}

fn shape_of<T>(a: &ArrayD<T>) -> String {
    let dims: Vec<String> = a.shape().iter().map(|d| d.to_string()).collect();
    if dims.len() == 1 {
        format!("({},)", dims[0])
    } else {
        format!("({})", dims.join(", "))
    }
}

fn describe_complex(a: &ArrayD<Complex64>) -> String {
    format!("Array complex128 {}", shape_of(a))
}

fn describe_real(a: &ArrayD<f64>) -> String {
    format!("Array float64 {}", shape_of(a))
}

/// Summary block printed by the result `Display` impls.
struct Summary {
    name: &'static str,
    lines: Vec<(&'static str, String)>,
}

impl Summary {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            lines: Vec::new(),
        }
    }

    fn line(mut self, label: &'static str, value: impl fmt::Display) -> Self {
        self.lines.push((label, value.to_string()));
        self
    }

    fn maybe(self, label: &'static str, value: Option<String>) -> Self {
        match value {
            Some(v) => self.line(label, v),
            None => self,
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.lines.iter().map(|(l, _)| l.len()).max().unwrap_or(0);
        write!(f, "==== {} ====", self.name)?;
        for (label, value) in &self.lines {
            write!(f, "\n{:<width$} : {}", label, value, width = width)?;
        }
        Ok(())
    }
}

/// Result of `sesolve`, `mesolve` and `sepropagator`.
#[derive(Debug, Clone)]
pub struct SolveResult {
    name: &'static str,
    pub meta: Metadata,
    batch: Vec<usize>,
    ysave: ArrayD<Complex64>,
    esave: Option<ArrayD<Complex64>>,
    extra: Option<ArrayD<Complex64>>,
    pub infos: Infos,
    pub grads: Option<Grads>,
}

pub type SEResult = SolveResult;
pub type MEResult = SolveResult;
pub type PropagatorResult = SolveResult;

impl SolveResult {
    pub(crate) fn assemble(
        name: &'static str,
        batch: Vec<usize>,
        outputs: &[TrajectoryOutput],
        meta: Metadata,
    ) -> Result<Self> {
        let save_states = meta.options.save_states;
        let states = outputs
            .iter()
            .map(|o| -> Result<ArrayD<Complex64>> {
                if save_states {
                    let views: Vec<_> = o.saved.ysave.iter().map(|y| y.view()).collect();
                    ndarray::stack(Axis(0), &views)
                        .map(|a| a.into_dyn())
                        .map_err(|e| ValidationError::field("states", e.to_string()).into())
                } else {
                    o.saved
                        .final_state()
                        .map(|y| y.clone().into_dyn())
                        .ok_or_else(|| ValidationError::field("tsave", "no save time reached").into())
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let has_expects = outputs.first().map_or(false, |o| o.saved.esave.nrows() > 0);
        let esave = if has_expects {
            let items: Vec<_> = outputs.iter().map(|o| o.saved.esave.clone().into_dyn()).collect();
            Some(stack(&batch, &items)?)
        } else {
            None
        };

        let extra = match outputs
            .iter()
            .map(|o| o.saved.extra.clone().map(|e| e.into_dyn()))
            .collect::<Option<Vec<_>>>()
        {
            Some(items) if !items.is_empty() => Some(stack(&batch, &items)?),
            _ => None,
        };

        let stats: Vec<Stats> = outputs.iter().map(|o| o.stats).collect();
        Ok(Self {
            name,
            infos: Infos::from_stats(&batch, &stats, meta.solver.adaptive().is_some())?,
            grads: stack_grads(&batch, outputs)?,
            ysave: stack(&batch, &states)?,
            esave,
            extra,
            batch,
            meta,
        })
    }

    /// Leading batch shape.
    pub fn batch_shape(&self) -> &[usize] {
        &self.batch
    }

    /// Saved states: `(...b, ntsave, n, m)`, or `(...b, n, m)` when only
    /// the final state was kept.
    pub fn states(&self) -> &ArrayD<Complex64> {
        &self.ysave
    }

    /// State at the last save time, `(...b, n, m)`.
    pub fn final_state(&self) -> ArrayD<Complex64> {
        if self.meta.options.save_states {
            let axis = Axis(self.batch.len());
            let last = self.ysave.len_of(axis).saturating_sub(1);
            self.ysave.index_axis(axis, last).to_owned()
        } else {
            self.ysave.clone()
        }
    }

    /// Expectation values `(...b, nE, ntsave)`, if observables were given.
    pub fn expects(&self) -> Option<&ArrayD<Complex64>> {
        self.esave.as_ref()
    }

    pub fn extra(&self) -> Option<&ArrayD<Complex64>> {
        self.extra.as_ref()
    }

    pub fn tsave(&self) -> &[f64] {
        &self.meta.tsave
    }

    pub fn final_time(&self) -> f64 {
        self.meta.final_time
    }

    fn summary(&self, name: &'static str) -> Summary {
        Summary::new(name)
            .line("Solver", self.meta.solver)
            .maybe("Gradient", self.meta.gradient.map(|g| g.to_string()))
            .line("States", describe_complex(&self.ysave))
            .maybe("Expects", self.esave.as_ref().map(describe_complex))
            .maybe("Extra", self.extra.as_ref().map(describe_complex))
            .line("Infos", &self.infos)
    }
}

impl fmt::Display for SolveResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.summary(self.name).fmt(f)
    }
}

/// Result of `dsmesolve`. The key axis is the last batch axis.
#[derive(Debug, Clone)]
pub struct DSMEResult {
    pub result: SolveResult,
    measurements: ArrayD<f64>,
}

impl DSMEResult {
    pub(crate) fn assemble(
        batch: Vec<usize>,
        outputs: &[TrajectoryOutput],
        meta: Metadata,
    ) -> Result<Self> {
        let items = outputs
            .iter()
            .map(|o| -> Result<ArrayD<f64>> {
                o.saved
                    .measurements
                    .clone()
                    .map(|m| m.into_dyn())
                    .ok_or_else(|| ValidationError::field("etas", "no monitored channel").into())
            })
            .collect::<Result<Vec<_>>>()?;
        let measurements = stack(&batch, &items)?;
        Ok(Self {
            result: SolveResult::assemble("DSMEResult", batch, outputs, meta)?,
            measurements,
        })
    }

    /// Time-averaged measurement records, `(...b, nLm, ntsave - 1)`.
    pub fn measurements(&self) -> &ArrayD<f64> {
        &self.measurements
    }

    pub fn states(&self) -> &ArrayD<Complex64> {
        self.result.states()
    }

    pub fn final_state(&self) -> ArrayD<Complex64> {
        self.result.final_state()
    }

    pub fn expects(&self) -> Option<&ArrayD<Complex64>> {
        self.result.expects()
    }
}

impl fmt::Display for DSMEResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.result
            .summary("DSMEResult")
            .line("Measurements", describe_real(&self.measurements))
            .fmt(f)
    }
}

/// Result of `mcsolve`. The key axis is the last batch axis of the
/// trajectory data.
#[derive(Debug, Clone)]
pub struct MCResult {
    /// Per-trajectory states and expectation values
    pub trajectories: SolveResult,
    /// Expectation values averaged over trajectories, `(...b, nE, ntsave)`
    expects: Option<ArrayD<Complex64>>,
    /// Jumps of each trajectory, shape `(...b, nkeys)`
    pub jumps: ArrayD<Vec<Jump>>,
}

impl MCResult {
    pub(crate) fn assemble(
        batch: Vec<usize>,
        outputs: &[(TrajectoryOutput, Vec<Jump>)],
        meta: Metadata,
    ) -> Result<Self> {
        let (trajectories, jumps): (Vec<TrajectoryOutput>, Vec<Vec<Jump>>) =
            outputs.iter().cloned().unzip();
        let jumps = ArrayD::from_shape_vec(IxDyn(&batch), jumps)
            .map_err(|e| ValidationError::field("keys", e.to_string()))?;
        let key_axis = Axis(batch.len().saturating_sub(1));
        let trajectories = SolveResult::assemble("MCResult", batch, &trajectories, meta)?;
        let expects = trajectories
            .expects()
            .map(|e| -> Result<ArrayD<Complex64>> {
                e.mean_axis(key_axis)
                    .ok_or_else(|| ValidationError::field("keys", "must not be empty").into())
            })
            .transpose()?;
        Ok(Self {
            trajectories,
            expects,
            jumps,
        })
    }

    /// Trajectory states, `(...b, nkeys, ntsave, n, 1)`.
    pub fn states(&self) -> &ArrayD<Complex64> {
        self.trajectories.states()
    }

    /// Trajectory-averaged expectation values.
    pub fn expects(&self) -> Option<&ArrayD<Complex64>> {
        self.expects.as_ref()
    }

    /// Total number of jumps over all trajectories.
    pub fn njumps(&self) -> usize {
        self.jumps.iter().map(Vec::len).sum()
    }
}

impl fmt::Display for MCResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Summary::new("MCResult")
            .line("Solver", self.trajectories.meta.solver)
            .line("States", describe_complex(self.trajectories.states()))
            .maybe("Expects", self.expects.as_ref().map(describe_complex))
            .line("Jumps", format!("{} over {} trajectories", self.njumps(), self.jumps.len()))
            .line("Infos", &self.trajectories.infos)
            .fmt(f)
    }
}

/// Result of `floquet`.
#[derive(Debug, Clone)]
pub struct FloquetResult {
    pub meta: Metadata,
    pub period: f64,
    /// Floquet modes at the save times, `(...b, ntsave, nmodes, n)`; the
    /// last axis holds the components of one mode.
    pub modes: ArrayD<Complex64>,
    /// Quasienergies in `(-π/T, π/T]`, ascending, `(...b, nmodes)`
    pub quasienergies: ArrayD<f64>,
    pub infos: Infos,
}

impl fmt::Display for FloquetResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Summary::new("FloquetResult")
            .line("Solver", self.meta.solver)
            .line("Period", self.period)
            .line("Modes", describe_complex(&self.modes))
            .line("Quasienergies", describe_real(&self.quasienergies))
            .line("Infos", &self.infos)
            .fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrators::Saved;
    use crate::linalg::c;
    use crate::operators::basis;
    use ndarray::Array2;

    fn output(k: usize, nsteps: usize) -> TrajectoryOutput {
        let states = vec![basis(3, k % 3), basis(3, (k + 1) % 3)];
        TrajectoryOutput {
            saved: Saved {
                ysave: states,
                esave: Array2::from_elem((1, 2), c(k as f64)),
                extra: None,
                measurements: Some(Array2::from_elem((1, 1), k as f64)),
            },
            final_time: 1.0,
            stats: Stats {
                nsteps,
                naccepted: nsteps,
                nrejected: 0,
            },
            grads: None,
        }
    }

    fn meta(save_states: bool) -> Metadata {
        Metadata {
            tsave: vec![0.0, 1.0],
            solver: Solver::Rk4 { dt: 0.1 },
            gradient: None,
            options: Options {
                save_states,
                ..Options::default()
            },
            final_time: 1.0,
        }
    }

    // =========================================================================
    // Stacking
    // =========================================================================

    #[test]
    fn test_stack_is_row_major() {
        let items: Vec<ArrayD<f64>> = (0..6)
            .map(|k| ArrayD::from_elem(IxDyn(&[2]), k as f64))
            .collect();
        let out = stack(&[2, 3], &items).unwrap();
        assert_eq!(out.shape(), &[2, 3, 2]);
        assert_eq!(out[[1, 0, 1]], 3.0);
    }

    #[test]
    fn test_stack_rejects_ragged_items() {
        let items = vec![
            ArrayD::<f64>::zeros(IxDyn(&[2])),
            ArrayD::<f64>::zeros(IxDyn(&[3])),
        ];
        assert!(stack(&[2], &items).is_err());
    }

    // =========================================================================
    // SolveResult
    // =========================================================================

    #[test]
    fn test_assemble_batched_result() {
        let outputs: Vec<_> = (0..4).map(|k| output(k, 10 + k)).collect();
        let result = SolveResult::assemble("SEResult", vec![2, 2], &outputs, meta(true)).unwrap();
        assert_eq!(result.states().shape(), &[2, 2, 2, 3, 1]);
        assert_eq!(result.final_state().shape(), &[2, 2, 3, 1]);
        assert_eq!(result.expects().unwrap().shape(), &[2, 2, 1, 2]);
        assert!(result.extra().is_none());
        assert_eq!(result.infos.nsteps[[1, 1]], 13);
        // element (1, 0) is trajectory 2, whose final state is |0>
        assert_eq!(result.final_state()[[1, 0, 0, 0]], c(1.0));
    }

    #[test]
    fn test_final_only_result() {
        let outputs = vec![TrajectoryOutput {
            saved: Saved {
                ysave: vec![basis(3, 2)],
                esave: Array2::zeros((0, 2)),
                extra: None,
                measurements: None,
            },
            ..output(0, 1)
        }];
        let result = SolveResult::assemble("SEResult", vec![], &outputs, meta(false)).unwrap();
        assert_eq!(result.states().shape(), &[3, 1]);
        assert_eq!(result.final_state(), basis(3, 2).into_dyn());
        assert!(result.expects().is_none());
    }

    #[test]
    fn test_display_summary() {
        let outputs = vec![output(0, 7)];
        let result = SolveResult::assemble("SEResult", vec![], &outputs, meta(true)).unwrap();
        let text = result.to_string();
        assert!(text.starts_with("==== SEResult ===="));
        assert!(text.contains("Solver  : Rk4 (dt=0.1)"));
        assert!(text.contains("States  : Array complex128 (2, 3, 1)"));
        assert!(text.contains("Expects : Array complex128 (1, 2)"));
        assert!(text.contains("Infos   : 7 steps"));
        assert!(!text.contains("Gradient"));
    }

    #[test]
    fn test_batched_infos_display_averages() {
        let stats = [
            Stats {
                nsteps: 10,
                naccepted: 8,
                nrejected: 2,
            },
            Stats {
                nsteps: 20,
                naccepted: 15,
                nrejected: 5,
            },
        ];
        let infos = Infos::from_stats(&[2], &stats, true).unwrap();
        assert_eq!(
            infos.to_string(),
            "avg. 15.0 steps (11.5 accepted, 3.5 rejected)"
        );
    }

    // =========================================================================
    // Stochastic results
    // =========================================================================

    #[test]
    fn test_dsme_measurements_shape() {
        let outputs: Vec<_> = (0..3).map(|k| output(k, 5)).collect();
        let result = DSMEResult::assemble(vec![3], &outputs, meta(true)).unwrap();
        assert_eq!(result.measurements().shape(), &[3, 1, 1]);
        assert_eq!(result.measurements()[[2, 0, 0]], 2.0);
        assert!(result.to_string().contains("Measurements : Array float64 (3, 1, 1)"));
    }

    #[test]
    fn test_mc_expects_are_averaged_over_keys() {
        let outputs: Vec<_> = (0..4)
            .map(|k| {
                let jumps = vec![Jump { t: 0.5, channel: 0 }; k];
                (output(k, 5), jumps)
            })
            .collect();
        let result = MCResult::assemble(vec![4], &outputs, meta(true)).unwrap();
        let expects = result.expects().unwrap();
        assert_eq!(expects.shape(), &[1, 2]);
        // mean of 0, 1, 2, 3
        assert_eq!(expects[[0, 0]], c(1.5));
        assert_eq!(result.njumps(), 6);
        assert_eq!(result.jumps[[3]].len(), 3);
    }
}
