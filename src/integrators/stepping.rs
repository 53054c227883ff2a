// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Generic stepping loop.
//!
//! One loop serves every step rule. The rule advances the state over a
//! [`StepSpan`] and optionally returns an error estimate; the loop owns the
//! schedule (fixed grid or adaptive control), the mandatory stop points
//! (save times and, for adaptive control, generator discontinuities) and
//! notifies an [`Observer`] of saves and accepted steps.
//!
//! The loop runs forward or backward in time; the direction is given by the
//! sign of `tsave[-1] - t0`.

use tracing::{debug, info, trace};

use super::controller::Controller;
use super::save::Saver;
use super::state::OdeState;
use super::tableau::StepSpan;
use crate::error::{Result, SolverError};
use crate::options::ProgressMeter;
use crate::solver::FIXED_MAX_STEPS;
use crate::time_array::{merge_times, TimeArray};

/// Result of one step attempt.
pub(crate) struct Attempt<S, R> {
    pub y: S,
    /// Local error estimate, for embedded methods
    pub error: Option<S>,
    /// Data needed to replay or differentiate the step
    pub record: R,
}

/// A single-step update rule.
pub(crate) trait StepRule<S> {
    type Record: Clone;

    fn step(&mut self, span: &StepSpan, y: &S) -> Result<Attempt<S, Self::Record>>;

    /// Right-hand side, used by the initial step heuristic.
    fn derivative(&self, t: f64, y: &S) -> S;

    /// Hook run once a step is accepted; may replace the new state.
    fn accept(&mut self, _span: &StepSpan, _y: &S, y_new: S) -> Result<S> {
        Ok(y_new)
    }
}

/// A step rule that can be replayed from its record and differentiated.
pub(crate) trait ReversibleRule<S>: StepRule<S> {
    /// Recompute an accepted step.
    fn replay(&self, span: &StepSpan, record: &Self::Record, y: &S) -> Result<S>;

    /// Cotangent of the step input and parameter gradient, given the
    /// cotangent `ybar` of the step output.
    fn vjp(
        &self,
        span: &StepSpan,
        record: &Self::Record,
        y: &S,
        ybar: &S,
        params: &[TimeArray],
    ) -> Result<(S, Vec<f64>)>;
}

/// Receives saves and accepted steps.
pub(crate) trait Observer<S, R> {
    fn on_save(&mut self, t: f64, y: &S);

    /// Called with the state before an accepted step.
    fn on_step(&mut self, _span: &StepSpan, _record: &R, _y: &S) {}
}

/// States that know how to store themselves in a [`Saver`].
pub(crate) trait Savable {
    fn save(&self, saver: &mut Saver);
}

impl Savable for ndarray::Array2<num_complex::Complex64> {
    fn save(&self, saver: &mut Saver) {
        saver.save_state(self);
    }
}

/// Observer that only saves.
pub(crate) struct SaveObserver {
    pub saver: Saver,
}

impl<S: Savable, R> Observer<S, R> for SaveObserver {
    fn on_save(&mut self, _t: f64, y: &S) {
        y.save(&mut self.saver);
    }
}

/// Step schedule.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Schedule {
    Fixed { dt: f64 },
    Adaptive(Controller),
}

/// Step counters of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub nsteps: usize,
    pub naccepted: usize,
    pub nrejected: usize,
}

/// Run parameters.
pub(crate) struct Run<'a> {
    pub t0: f64,
    /// Save times, monotone in the direction of travel
    pub tsave: &'a [f64],
    /// Generator discontinuities; stop points for adaptive schedules, snap
    /// targets for fixed grids
    pub discontinuities: &'a [f64],
    pub schedule: Schedule,
    pub progress: ProgressMeter,
}

/// Integrate from `run.t0` through every save time.
pub(crate) fn integrate<S, R, O>(
    rule: &mut R,
    observer: &mut O,
    y0: S,
    run: &Run<'_>,
) -> Result<(S, Stats)>
where
    S: OdeState,
    R: StepRule<S>,
    O: Observer<S, R::Record>,
{
    let Some(&tend) = run.tsave.last() else {
        return Ok((y0, Stats::default()));
    };
    let t0 = run.t0;
    let dir = if tend >= t0 { 1.0 } else { -1.0 };
    let reached = |t: f64, s: f64| dir * (s - t) <= 1e-12 * t.abs().max(1.0);

    // save times at or before t0 see the initial state
    let mut next_save = 0;
    while next_save < run.tsave.len() && reached(t0, run.tsave[next_save]) {
        observer.on_save(run.tsave[next_save], &y0);
        next_save += 1;
    }

    let pending = &run.tsave[next_save..];
    let stops = stop_points(t0, tend, dir, pending, run.discontinuities, &run.schedule);
    let mut progress = Progress::new(run.progress, t0, tend);

    let mut t = t0;
    let mut y = y0;
    let mut stats = Stats::default();
    let mut si = 0;

    match run.schedule {
        Schedule::Fixed { dt } => {
            let dt = dir * dt.abs();
            let snap = 1e-9 * dt.abs();
            let breaks = in_direction(t0, tend, dir, run.discontinuities);
            let mut bi = 0;
            let mut n: usize = 0;
            while si < stops.len() {
                if stats.nsteps >= FIXED_MAX_STEPS {
                    return Err(SolverError::MaxStepsReached {
                        t,
                        steps: stats.nsteps,
                    }
                    .into());
                }
                let stop = stops[si];
                let mut grid = t0 + (n + 1) as f64 * dt;
                while bi < breaks.len() && dir * (grid - breaks[bi]) > snap {
                    bi += 1;
                }
                // grid points within rounding of a breakpoint land on it
                if bi < breaks.len() && (grid - breaks[bi]).abs() <= snap {
                    grid = breaks[bi];
                }
                let target = if dir * (stop - grid) <= snap {
                    if (grid - stop).abs() <= snap {
                        n += 1;
                    }
                    stop
                } else {
                    n += 1;
                    grid
                };

                let span = StepSpan::new(t, target);
                let attempt = rule.step(&span, &y)?;
                observer.on_step(&span, &attempt.record, &y);
                y = rule.accept(&span, &y, attempt.y)?;
                t = target;
                stats.nsteps += 1;
                stats.naccepted += 1;

                while si < stops.len() && reached(t, stops[si]) {
                    si += 1;
                }
                while next_save < run.tsave.len() && reached(t, run.tsave[next_save]) {
                    observer.on_save(run.tsave[next_save], &y);
                    next_save += 1;
                }
                progress.update(t);
            }
        }
        Schedule::Adaptive(ctrl) => {
            let mut h = {
                let f = |t: f64, y: &S| rule.derivative(t, y);
                ctrl.initial_step(&f, t0, &y, tend - t0)
            };
            while si < stops.len() {
                let attempts = stats.naccepted + stats.nrejected;
                if attempts >= ctrl.config.max_steps {
                    return Err(SolverError::MaxStepsReached { t, steps: attempts }.into());
                }
                let stop = stops[si];
                let min_step = 16.0 * f64::EPSILON * t.abs().max(1.0);
                let clipped = h.abs() >= (stop - t).abs() - min_step;
                let target = if clipped { stop } else { t + h };
                if !clipped && h.abs() < min_step {
                    return Err(SolverError::StepSizeTooSmall {
                        t,
                        dt: h,
                        steps: attempts,
                    }
                    .into());
                }

                let span = StepSpan::new(t, target);
                let attempt = rule.step(&span, &y)?;
                let ratio = match &attempt.error {
                    Some(err) => ctrl.ratio(err, &y, &attempt.y),
                    None => 0.0,
                };

                if ratio <= 1.0 {
                    observer.on_step(&span, &attempt.record, &y);
                    y = rule.accept(&span, &y, attempt.y)?;
                    t = target;
                    stats.naccepted += 1;
                    if !clipped {
                        h = span.h() * ctrl.factor(ratio);
                    }
                    while si < stops.len() && reached(t, stops[si]) {
                        si += 1;
                    }
                    while next_save < run.tsave.len() && reached(t, run.tsave[next_save]) {
                        observer.on_save(run.tsave[next_save], &y);
                        next_save += 1;
                    }
                    progress.update(t);
                } else {
                    stats.nrejected += 1;
                    trace!(t, dt = span.h(), ratio, "step rejected");
                    h = span.h() * ctrl.factor(ratio);
                }
            }
            stats.nsteps = stats.naccepted + stats.nrejected;
        }
    }

    debug!(
        t,
        nsteps = stats.nsteps,
        nrejected = stats.nrejected,
        "integration finished"
    );
    Ok((y, stats))
}

/// Mandatory stop points strictly after `t0`, ordered in the direction of
/// travel and ending at `tend`.
fn stop_points(
    t0: f64,
    tend: f64,
    dir: f64,
    pending: &[f64],
    discontinuities: &[f64],
    schedule: &Schedule,
) -> Vec<f64> {
    let jumps = match schedule {
        Schedule::Adaptive(_) => discontinuities,
        Schedule::Fixed { .. } => &[],
    };
    let times: Vec<f64> = pending.iter().chain(jumps.iter()).copied().collect();
    in_direction(t0, tend, dir, &times)
}

/// Times in `(t0, tend]`, ordered in the direction of travel.
fn in_direction(t0: f64, tend: f64, dir: f64, times: &[f64]) -> Vec<f64> {
    let inside = |x: f64| dir * (x - t0) > 0.0 && dir * (tend - x) >= 0.0;
    let mut out = merge_times(times.iter().copied().filter(|&x| inside(x)));
    if dir < 0.0 {
        out.reverse();
    }
    out
}

/// Evenly spaced progress events.
struct Progress {
    t0: f64,
    span: f64,
    updates: usize,
    next: usize,
}

impl Progress {
    fn new(meter: ProgressMeter, t0: f64, tend: f64) -> Self {
        let updates = match meter {
            ProgressMeter::Off => 0,
            ProgressMeter::Tracing { updates } => updates,
        };
        Self {
            t0,
            span: tend - t0,
            updates,
            next: 1,
        }
    }

    fn update(&mut self, t: f64) {
        if self.updates == 0 || self.span == 0.0 {
            return;
        }
        let fraction = (t - self.t0) / self.span;
        while self.next <= self.updates && fraction + 1e-12 >= self.next as f64 / self.updates as f64 {
            info!(
                percent = 100 * self.next / self.updates,
                t,
                "integration progress"
            );
            self.next += 1;
        }
    }
}
