// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Gradient strategies.
//!
//! - **Autograd** keeps a tape of every accepted step (span, record, input
//!   state) and reverses it with the rule's vector-Jacobian product.
//! - **CheckpointAutograd** keeps the step schedule and a bounded set of
//!   states; each segment between checkpoints is recomputed forward during
//!   the backward sweep.
//! - **Adjoint** integrates the augmented system `(y, λ, g)` backward in time
//!   with the forward tableau and step control; no tape is kept.

use ndarray::{Array1, Array2};
use num_complex::Complex64;
use tracing::debug;

use super::save::{Saved, Saver};
use super::state::{AdjointState, OdeState};
use super::stepping::{
    integrate, Attempt, Observer, ReversibleRule, Run, Savable, Stats, StepRule,
};
use super::tableau::{rk_step, StepSpan, Tableau};
use crate::equations::Generator;
use crate::error::Result;
use crate::gradient::{GradientSpec, TrajectoryGrads};
use crate::options::ProgressMeter;
use crate::time_array::TimeArray;

/// States a loss can be differentiated against.
pub(crate) trait Differentiable: OdeState + Savable {
    /// Quantum state part.
    fn primal(&self) -> &Array2<Complex64>;

    /// Cotangent whose quantum state part is `g` and whose other parts are
    /// zero.
    fn cotangent(&self, g: Array2<Complex64>) -> Self;
}

impl Differentiable for Array2<Complex64> {
    fn primal(&self) -> &Array2<Complex64> {
        self
    }

    fn cotangent(&self, g: Array2<Complex64>) -> Self {
        g
    }
}

/// Output of a differentiated run.
pub(crate) struct Differentiated<S> {
    pub saved: Saved,
    pub y: S,
    pub stats: Stats,
    pub grads: TrajectoryGrads,
}

fn accumulate(total: &mut [f64], step: &[f64]) {
    for (t, s) in total.iter_mut().zip(step) {
        *t += s;
    }
}

// =============================================================================
// Autograd
// =============================================================================

struct Tape<S, R> {
    saver: Saver,
    steps: Vec<(StepSpan, R, S)>,
}

impl<S: Savable + Clone, R: Clone> Observer<S, R> for Tape<S, R> {
    fn on_save(&mut self, _t: f64, y: &S) {
        y.save(&mut self.saver);
    }

    fn on_step(&mut self, span: &StepSpan, record: &R, y: &S) {
        self.steps.push((*span, record.clone(), y.clone()));
    }
}

/// Forward run with a full tape, then reverse accumulation.
pub(crate) fn autograd<S, R>(
    rule: &mut R,
    saver: Saver,
    y0: S,
    run: &Run<'_>,
    spec: &GradientSpec,
) -> Result<Differentiated<S>>
where
    S: Differentiable,
    R: ReversibleRule<S>,
{
    let mut tape = Tape {
        saver,
        steps: Vec::new(),
    };
    let (y, stats) = integrate(rule, &mut tape, y0, run)?;

    let (loss, g) = spec.loss.evaluate(y.primal());
    let mut ybar = y.cotangent(g);
    let mut grad = vec![0.0; spec.params.len()];
    for (span, record, yi) in tape.steps.iter().rev() {
        let (prev, dg) = rule.vjp(span, record, yi, &ybar, &spec.params)?;
        accumulate(&mut grad, &dg);
        ybar = prev;
    }

    Ok(Differentiated {
        saved: tape.saver.finalize(run.tsave),
        y,
        stats,
        grads: TrajectoryGrads {
            loss,
            params: grad,
            y0: ybar.primal().clone(),
        },
    })
}

// =============================================================================
// Checkpointed autograd
// =============================================================================

/// Step schedule plus at most `capacity` states, evenly thinned.
struct Checkpoints<S, R> {
    saver: Saver,
    schedule: Vec<(StepSpan, R)>,
    stored: Vec<(usize, S)>,
    stride: usize,
    capacity: usize,
}

impl<S: Savable + Clone, R: Clone> Observer<S, R> for Checkpoints<S, R> {
    fn on_save(&mut self, _t: f64, y: &S) {
        y.save(&mut self.saver);
    }

    fn on_step(&mut self, span: &StepSpan, record: &R, y: &S) {
        let idx = self.schedule.len();
        if idx % self.stride == 0 {
            self.stored.push((idx, y.clone()));
            if self.stored.len() > self.capacity {
                let keep = 2 * self.stride;
                self.stored.retain(|(i, _)| i % keep == 0);
                self.stride = keep;
            }
        }
        self.schedule.push((*span, record.clone()));
    }
}

/// Forward run keeping `ncheckpoints` states; segments are recomputed on
/// the way back.
pub(crate) fn checkpointed<S, R>(
    rule: &mut R,
    saver: Saver,
    y0: S,
    run: &Run<'_>,
    spec: &GradientSpec,
    ncheckpoints: usize,
) -> Result<Differentiated<S>>
where
    S: Differentiable,
    R: ReversibleRule<S>,
{
    let mut ck = Checkpoints {
        saver,
        schedule: Vec::new(),
        stored: Vec::new(),
        stride: 1,
        capacity: ncheckpoints.max(1),
    };
    let (y, stats) = integrate(rule, &mut ck, y0, run)?;

    let (loss, g) = spec.loss.evaluate(y.primal());
    let mut ybar = y.cotangent(g);
    let mut grad = vec![0.0; spec.params.len()];

    let total = ck.schedule.len();
    let ends: Vec<usize> = ck
        .stored
        .iter()
        .skip(1)
        .map(|(i, _)| *i)
        .chain(std::iter::once(total))
        .collect();
    for ((start, state), &end) in ck.stored.iter().zip(&ends).rev() {
        let segment = &ck.schedule[*start..end];
        let mut inputs = Vec::with_capacity(segment.len());
        let mut yi = state.clone();
        for (span, record) in segment {
            let next = rule.replay(span, record, &yi)?;
            inputs.push(yi);
            yi = next;
        }
        for ((span, record), yi) in segment.iter().zip(&inputs).rev() {
            let (prev, dg) = rule.vjp(span, record, yi, &ybar, &spec.params)?;
            accumulate(&mut grad, &dg);
            ybar = prev;
        }
    }
    debug!(
        nsteps = total,
        ncheckpoints = ck.stored.len(),
        stride = ck.stride,
        "checkpointed backward sweep finished"
    );

    Ok(Differentiated {
        saved: ck.saver.finalize(run.tsave),
        y,
        stats,
        grads: TrajectoryGrads {
            loss,
            params: grad,
            y0: ybar.primal().clone(),
        },
    })
}

// =============================================================================
// Continuous adjoint
// =============================================================================

/// Augmented backward dynamics of a linear generator.
struct AdjointRule<'a> {
    tab: &'static Tableau,
    gen: &'a dyn Generator,
    params: &'a [TimeArray],
}

impl AdjointRule<'_> {
    fn field(&self, t: f64, s: &AdjointState) -> AdjointState {
        let grad = self.gen.param_vjp(t, &s.y, &s.lambda, self.params);
        AdjointState {
            y: self.gen.vector_field(t, &s.y),
            lambda: -self.gen.adjoint_field(t, &s.lambda),
            grad: Array1::from(grad).mapv(|g| -g),
        }
    }
}

impl StepRule<AdjointState> for AdjointRule<'_> {
    type Record = ();

    fn step(&mut self, span: &StepSpan, y: &AdjointState) -> Result<Attempt<AdjointState, ()>> {
        let f = |t: f64, s: &AdjointState| self.field(t, s);
        let (y, error) = rk_step(self.tab, &f, span, y);
        Ok(Attempt {
            y,
            error,
            record: (),
        })
    }

    fn derivative(&self, t: f64, y: &AdjointState) -> AdjointState {
        self.field(t, y)
    }
}

struct Discard;

impl<S, R> Observer<S, R> for Discard {
    fn on_save(&mut self, _t: f64, _y: &S) {}
}

/// Integrate the costate from the end of `forward` back to its start.
///
/// `y1` is the forward state at `tsave[-1]`.
pub(crate) fn continuous_adjoint(
    tab: &'static Tableau,
    gen: &dyn Generator,
    forward: &Run<'_>,
    y1: &Array2<Complex64>,
    spec: &GradientSpec,
) -> Result<(TrajectoryGrads, Stats)> {
    let (loss, g) = spec.loss.evaluate(y1);
    let tend = forward.tsave.last().copied().unwrap_or(forward.t0);
    let start = [forward.t0];
    let backward = Run {
        t0: tend,
        tsave: &start,
        discontinuities: forward.discontinuities,
        schedule: forward.schedule,
        progress: ProgressMeter::Off,
    };
    let mut rule = AdjointRule {
        tab,
        gen,
        params: &spec.params,
    };
    let s1 = AdjointState {
        y: y1.clone(),
        lambda: g,
        grad: Array1::zeros(spec.params.len()),
    };
    let (s0, stats) = integrate(&mut rule, &mut Discard, s1, &backward)?;
    debug!(nsteps = stats.nsteps, "adjoint sweep finished");
    Ok((
        TrajectoryGrads {
            loss,
            params: s0.grad.to_vec(),
            y0: s0.lambda,
        },
        stats,
    ))
}
