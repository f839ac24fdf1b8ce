//! Bound-aware Newton solver for the flattened model.
//!
//! The solver drives the tolerance-scaled residual vector below one in
//! magnitude (LMET < 0). Each full Newton step is limited so that every
//! bound expression stays strictly positive, with a configurable safety
//! margin; after the step, the contribution relax chain may project the
//! state back onto a physical branch (e.g. the chosen root of a cubic
//! equation of state). Per-iteration diagnostics go to an optional report
//! sink, one line per iteration.

pub mod linear;

use std::io::Write;
use std::time::Instant;

use log::{debug, info};
use serde::Serialize;

use crate::error::SolverError;
use crate::model::numeric::NumericHandler;
use crate::structures::NestedQuantity;

pub use linear::{DenseLuBackend, LinearSolveError, LinearSolverBackend};

/// Diagnostics of one solver iteration.
#[derive(Debug, Clone, Serialize)]
pub struct IterationRecord {
    pub iteration: usize,
    /// `log10` of the largest scaled residual magnitude.
    pub lmet: f64,
    /// Applied step factor; zero on the converged evaluation.
    pub alpha: f64,
    /// Wall-clock seconds since the solve started.
    pub wallclock: f64,
    /// Name of the bound that limited the step, if any.
    pub limiting_bound: Option<String>,
    /// Name of the residual with the largest scaled magnitude.
    pub max_residual: String,
}

/// How a solve ended without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Termination {
    /// Every scaled residual is below one in magnitude.
    Converged,
    /// The user callback asked to stop; the partial state is preserved.
    Interrupted,
}

/// The result of a completed `solve()` call.
#[derive(Debug)]
pub struct SolverReport {
    pub termination: Termination,
    pub iterations: Vec<IterationRecord>,
    /// The final (converged or partial) state vector.
    pub state: Vec<f64>,
    /// All model and material properties at the final state.
    pub properties: NestedQuantity,
}

impl SolverReport {
    pub fn converged(&self) -> bool {
        self.termination == Termination::Converged
    }
}

/// Solver configuration.
#[derive(Debug, Clone, Serialize)]
pub struct SolverOptions {
    /// Hard iteration budget.
    pub max_iter: usize,
    /// Safety margin on the bound-limited step factor.
    pub gamma: f64,
}

impl Default for SolverOptions {
    fn default() -> SolverOptions {
        SolverOptions {
            max_iter: 30,
            gamma: 0.9,
        }
    }
}

impl SolverOptions {
    fn validate(&self) -> Result<(), SolverError> {
        if self.max_iter == 0 || self.max_iter > 10_000 {
            return Err(SolverError::IterativeProcessFailed(format!(
                "max_iter {} outside 1..=10000",
                self.max_iter
            )));
        }
        if !(0.1..=0.999).contains(&self.gamma) {
            return Err(SolverError::IterativeProcessFailed(format!(
                "gamma {} outside 0.1..=0.999",
                self.gamma
            )));
        }
        Ok(())
    }
}

/// Callback invoked after every iteration; returning `false` interrupts
/// the solve with the partial state preserved.
pub type IterationCallback<'c> =
    Box<dyn FnMut(&IterationRecord, &[f64], &NestedQuantity) -> bool + 'c>;

/// The simulation solver: a damped Newton iteration that respects the
/// model's domain bounds. Model and thermodynamic parameters are treated
/// as constant over one solve.
pub struct SimulationSolver<'c> {
    handler: NumericHandler,
    options: SolverOptions,
    backend: Box<dyn LinearSolverBackend>,
    report_sink: Option<Box<dyn Write + 'c>>,
    callback: Option<IterationCallback<'c>>,
}

impl<'c> SimulationSolver<'c> {
    pub fn new(handler: NumericHandler) -> SimulationSolver<'c> {
        SimulationSolver {
            handler,
            options: SolverOptions::default(),
            backend: Box::new(DenseLuBackend),
            report_sink: None,
            callback: None,
        }
    }

    pub fn with_options(mut self, options: SolverOptions) -> SimulationSolver<'c> {
        self.options = options;
        self
    }

    /// Replace the linear solver backend.
    pub fn with_backend(mut self, backend: Box<dyn LinearSolverBackend>) -> SimulationSolver<'c> {
        self.backend = backend;
        self
    }

    /// Stream one diagnostic line per iteration to the sink.
    pub fn with_report_sink(mut self, sink: Box<dyn Write + 'c>) -> SimulationSolver<'c> {
        self.report_sink = Some(sink);
        self
    }

    pub fn with_callback(mut self, callback: IterationCallback<'c>) -> SimulationSolver<'c> {
        self.callback = Some(callback);
        self
    }

    pub fn handler(&self) -> &NumericHandler {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut NumericHandler {
        &mut self.handler
    }

    pub fn into_handler(self) -> NumericHandler {
        self.handler
    }

    fn report_line(&mut self, record: &IterationRecord) {
        if let Some(sink) = &mut self.report_sink {
            let alpha = if record.alpha == 0.0 {
                "      -".to_string()
            } else {
                format!("{:7.4}", record.alpha)
            };
            let limit = record.limiting_bound.as_deref().unwrap_or("-");
            // best-effort diagnostics; a failing sink must not kill the solve
            let _ = writeln!(
                sink,
                "{:4}  {:8.3}  {}  {:8.3}  {:<24}  {}",
                record.iteration, record.lmet, alpha, record.wallclock, limit, record.max_residual
            );
        }
    }

    fn ensure_finite(values: &[f64], location: &str) -> Result<(), SolverError> {
        if values.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::NumericBreak {
                location: location.to_string(),
            });
        }
        Ok(())
    }

    /// Run the Newton iteration from the handler's current state.
    ///
    /// On convergence the handler's state holds the solution; on failure
    /// it holds the last accepted step, never a rejected trial.
    pub fn solve(&mut self) -> Result<SolverReport, SolverError> {
        self.options.validate()?;
        let n = self.handler.n_states();
        let m = self.handler.n_residuals();
        if n != m {
            return Err(SolverError::NonSquareSystem {
                residuals: m,
                variables: n,
            });
        }

        if let Some(sink) = &mut self.report_sink {
            let _ = writeln!(
                sink,
                "Iter      LMET    Alpha      Time  Limit on bound            Max residual"
            );
        }

        let start = Instant::now();
        let mut records: Vec<IterationRecord> = Vec::new();
        let mut x = self.handler.state()?.clone();
        let gamma = self.options.gamma;

        for iteration in 0.. {
            let (residuals, jacobian) = self.handler.residual_system(&x)?;
            SimulationSolver::ensure_finite(&residuals, "residual vector")?;
            SimulationSolver::ensure_finite(&jacobian.values, "residual Jacobian")?;

            let (max_index, max_abs) = residuals
                .iter()
                .enumerate()
                .map(|(i, r)| (i, r.abs()))
                .fold((0, 0.0), |acc, item| if item.1 > acc.1 { item } else { acc });
            let lmet = max_abs.log10();
            let max_residual = self
                .handler
                .residual_names()
                .get(max_index)
                .cloned()
                .unwrap_or_default();

            if lmet < 0.0 {
                // converged; the trailing evaluation is reported as an
                // idempotent iteration of its own
                let record = IterationRecord {
                    iteration,
                    lmet,
                    alpha: 0.0,
                    wallclock: start.elapsed().as_secs_f64(),
                    limiting_bound: None,
                    max_residual,
                };
                self.report_line(&record);
                records.push(record);
                break;
            }

            if iteration >= self.options.max_iter {
                return Err(SolverError::IterativeProcessFailed(format!(
                    "no convergence after {} iterations",
                    self.options.max_iter
                )));
            }

            // full Newton direction: J dx = -r
            let rhs: Vec<f64> = residuals.iter().map(|r| -r).collect();
            let dx = self.backend.solve(&jacobian, &rhs).map_err(|error| match error {
                LinearSolveError::Singular { near_null } => {
                    let mut ranked: Vec<(f64, &String)> = near_null
                        .iter()
                        .map(|v| v.abs())
                        .zip(self.handler.state_names())
                        .collect();
                    ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
                    let threshold = ranked.first().map(|(v, _)| v * 0.3).unwrap_or(0.0);
                    let suspects = ranked
                        .iter()
                        .take_while(|(v, _)| *v >= threshold)
                        .map(|(_, name)| (*name).clone())
                        .collect();
                    SolverError::SingularJacobian { suspects }
                }
                LinearSolveError::Failed(message) => SolverError::Backend(message),
            })?;
            SimulationSolver::ensure_finite(&dx, "Newton step")?;

            // bound-limited step factor
            let (bounds, bound_jacobian) = self.handler.bound_system(&x)?;
            let delta_bounds = bound_jacobian.mul_vector(&dx);
            let mut alpha_bound = f64::INFINITY;
            let mut limiting_bound = None;
            for (i, (&b, &db)) in bounds.iter().zip(&delta_bounds).enumerate() {
                if db < 0.0 {
                    let limit = -b / db;
                    if limit < alpha_bound {
                        alpha_bound = limit;
                        limiting_bound = self.handler.bound_names().get(i).cloned();
                    }
                }
            }
            let alpha = 1f64.min(gamma * alpha_bound);
            if alpha <= f64::EPSILON {
                return Err(SolverError::IterativeProcessFailed(format!(
                    "step factor underflow at bound {}",
                    limiting_bound.as_deref().unwrap_or("unknown")
                )));
            }
            if alpha >= 1.0 {
                limiting_bound = None;
            }

            for (value, step) in x.iter_mut().zip(&dx) {
                *value += alpha * step;
            }
            // contribution projections act on the freshly stepped state
            self.handler.relax(&mut x)?;
            *self.handler.state()? = x.clone();

            let record = IterationRecord {
                iteration,
                lmet,
                alpha,
                wallclock: start.elapsed().as_secs_f64(),
                limiting_bound,
                max_residual,
            };
            self.report_line(&record);
            debug!(
                "iteration {iteration}: LMET {lmet:.3}, alpha {alpha:.4}",
            );

            let keep_going = match &mut self.callback {
                Some(callback) => {
                    let properties = self.handler.properties(&x)?;
                    callback(&record, &x, &properties)
                }
                None => true,
            };
            records.push(record);
            if !keep_going {
                let properties = self.handler.properties(&x)?;
                return Ok(SolverReport {
                    termination: Termination::Interrupted,
                    iterations: records,
                    state: x,
                    properties,
                });
            }
        }

        info!("converged after {} iteration(s)", records.len());
        *self.handler.state()? = x.clone();
        let properties = self.handler.properties(&x)?;
        Ok(SolverReport {
            termination: Termination::Converged,
            iterations: records,
            state: x,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssemblyError;
    use crate::model::{build, Interface, ModelContext, ProcessModel};
    use crate::quantity::Quantity;
    use crate::structures::Nested;
    use crate::thermo::frame::{ContributionEntry, FrameConfig, ThermoFactory};
    use crate::thermo::material::MaterialDefinition;
    use crate::thermo::state::InitialState;
    use crate::thermo::store::{StringThermoSource, ThermoParameterStore};
    use serde_json::json;
    use std::rc::Rc;

    /// Ideal-gas methane material with literal reference parameters.
    fn methane_definition() -> Rc<MaterialDefinition> {
        let factory = ThermoFactory::default();
        let config = FrameConfig {
            name: "ideal-gas".into(),
            species: vec![("CH4".to_string(), "CH4".to_string())],
            state: "GibbsState".into(),
            contributions: [
                "H0S0ReferenceState",
                "LinearHeatCapacity",
                "StandardState",
                "IdealMix",
                "GibbsIdealGas",
                "GenericProperties",
            ]
            .into_iter()
            .map(ContributionEntry::plain)
            .collect(),
        };
        let frame = factory.create_frame(&config).unwrap();
        let store = Rc::new(ThermoParameterStore::new("parameters"));
        store
            .add_source(
                "literature",
                Box::new(
                    StringThermoSource::new(&json!({
                        "H0S0ReferenceState": {
                            "dh_form": {"CH4": "-74.87 kJ/mol"},
                            "s_0": {"CH4": "188.66 J/(mol*K)"},
                            "T_ref": "25 degC",
                            "p_ref": "1 bar"
                        },
                        "LinearHeatCapacity": {
                            "cp_a": {"CH4": "35.69 J/(mol*K)"},
                            "cp_b": {"CH4": "0.05 J/(mol*K**2)"}
                        }
                    }))
                    .unwrap(),
                ),
            )
            .unwrap();
        let initial = InitialState::new(
            Quantity::new(400.0, "K").unwrap(),
            Quantity::new(2.0, "bar").unwrap(),
            Quantity::vector(&[1.0], "mol/s").unwrap(),
        );
        MaterialDefinition::new(frame, initial, store).unwrap()
    }

    /// A methane source fixing temperature, pressure and volume flow.
    struct Source {
        definition: Rc<MaterialDefinition>,
    }

    impl ProcessModel for Source {
        fn interface(&self, ifc: &mut Interface) -> Result<(), AssemblyError> {
            ifc.parameter("T", 25.0, "degC")?;
            ifc.parameter("p", 1.0, "bar")?;
            ifc.parameter("V", 10.0, "m**3/h")?;
            Ok(())
        }

        fn define(&self, ctx: &mut ModelContext) -> Result<(), AssemblyError> {
            let feed = ctx.create_flow("feed", &self.definition)?;
            let t_residual = (feed.property("T")? - ctx.parameter("T")?)?;
            ctx.add_residual("T", t_residual, "K", 1e-7)?;
            let p_residual = (feed.property("p")? - ctx.parameter("p")?)?;
            ctx.add_residual("p", p_residual, "bar", 1e-7)?;
            let v_residual = (feed.property("V")? - ctx.parameter("V")?)?;
            ctx.add_residual("V", v_residual, "m**3/h", 1e-7)?;
            Ok(())
        }
    }

    fn solved_source() -> SolverReport {
        let tree = build(
            &Source {
                definition: methane_definition(),
            },
            "model",
        )
        .unwrap();
        let handler = NumericHandler::new(tree).unwrap();
        let mut solver = SimulationSolver::new(handler);
        solver.solve().unwrap()
    }

    #[test]
    fn pure_methane_flow_converges() {
        let report = solved_source();
        assert!(report.converged());
        // a handful of Newton steps from [400 K, 2 bar, 1 mol/s]
        assert!(report.iterations.len() <= 6, "{}", report.iterations.len());

        // n_CH4 = p V / (R T)
        let state = &report.state;
        assert!((state[0] - 298.15).abs() < 1e-6);
        assert!((state[1] - 1e5).abs() < 1e-3);
        assert!((state[2] - 0.112054).abs() < 1e-5);

        let feed = report
            .properties
            .get(&["thermo_props", "model", "feed"])
            .unwrap();
        let entropy = feed.get(&["S"]).unwrap().as_leaf().unwrap();
        assert!((entropy.value_si().unwrap() - 21.14).abs() < 5e-3);
        let mu = feed.get(&["mu"]).unwrap().as_leaf().unwrap();
        assert!((mu.values_si().unwrap()[0] + 131_118.98).abs() < 0.05);
        // 0.112054 mol/s expressed per day
        let n = feed.get(&["n"]).unwrap().as_leaf().unwrap();
        let kmol_per_day = n.values_si().unwrap()[0] * 86_400.0 / 1000.0;
        assert!((kmol_per_day - 9.6815).abs() < 1e-3);
    }

    #[test]
    fn solving_a_converged_model_is_idempotent() {
        let tree = build(
            &Source {
                definition: methane_definition(),
            },
            "model",
        )
        .unwrap();
        let handler = NumericHandler::new(tree).unwrap();
        let mut solver = SimulationSolver::new(handler);
        let first = solver.solve().unwrap();
        assert!(first.converged());
        let second = solver.solve().unwrap();
        assert!(second.converged());
        assert_eq!(second.iterations.len(), 1);
        assert!(second.iterations[0].lmet < 0.0);
        assert_eq!(second.iterations[0].alpha, 0.0);
    }

    #[test]
    fn bounds_stay_strictly_positive_along_the_path() {
        let tree = build(
            &Source {
                definition: methane_definition(),
            },
            "model",
        )
        .unwrap();
        let handler = NumericHandler::new(tree).unwrap();
        let mut solver = SimulationSolver::new(handler).with_callback(Box::new(
            |_record, _x, _props| true,
        ));
        let report = solver.solve().unwrap();
        assert!(report.converged());
        let handler = solver.handler_mut();
        let x = report.state.clone();
        let (bounds, _) = handler.bound_system(&x).unwrap();
        assert!(bounds.iter().all(|&b| b > 0.0));
    }

    #[test]
    fn callback_can_interrupt() {
        let tree = build(
            &Source {
                definition: methane_definition(),
            },
            "model",
        )
        .unwrap();
        let handler = NumericHandler::new(tree).unwrap();
        let mut solver =
            SimulationSolver::new(handler).with_callback(Box::new(|_record, _x, _props| false));
        let report = solver.solve().unwrap();
        assert_eq!(report.termination, Termination::Interrupted);
        assert_eq!(report.iterations.len(), 1);
    }

    #[test]
    fn report_stream_emits_one_line_per_iteration() {
        let tree = build(
            &Source {
                definition: methane_definition(),
            },
            "model",
        )
        .unwrap();
        let handler = NumericHandler::new(tree).unwrap();
        let mut buffer = Vec::new();
        let report = {
            let mut solver =
                SimulationSolver::new(handler).with_report_sink(Box::new(&mut buffer));
            solver.solve().unwrap()
        };
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].contains("LMET"));
        assert!(lines[0].contains("Limit on bound"));
        assert_eq!(lines.len(), report.iterations.len() + 1);
    }

    /// Over-determined variant: one extra residual.
    struct OverDetermined {
        definition: Rc<MaterialDefinition>,
    }

    impl ProcessModel for OverDetermined {
        fn interface(&self, ifc: &mut Interface) -> Result<(), AssemblyError> {
            ifc.parameter("T", 25.0, "degC")?;
            Ok(())
        }

        fn define(&self, ctx: &mut ModelContext) -> Result<(), AssemblyError> {
            let feed = ctx.create_flow("feed", &self.definition)?;
            let t = feed.property("T")?;
            let target = ctx.parameter("T")?;
            ctx.add_residual("T", (&t - &target)?, "K", 1e-7)?;
            ctx.add_residual("T2", (&t - &target)?, "K", 1e-7)?;
            ctx.add_residual("p", (feed.property("p")? - Quantity::new(1.0, "bar").unwrap())?, "bar", 1e-7)?;
            ctx.add_residual("V", (feed.property("V")? - Quantity::new(1.0, "m**3/h").unwrap())?, "m**3/h", 1e-7)?;
            Ok(())
        }
    }

    #[test]
    fn non_square_systems_are_rejected() {
        let tree = build(
            &OverDetermined {
                definition: methane_definition(),
            },
            "model",
        )
        .unwrap();
        let handler = NumericHandler::new(tree).unwrap();
        let mut solver = SimulationSolver::new(handler);
        match solver.solve() {
            Err(SolverError::NonSquareSystem {
                residuals: 4,
                variables: 3,
            }) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    /// Square but degenerate: the temperature residual twice, nothing
    /// pinning the molar flow.
    struct Degenerate {
        definition: Rc<MaterialDefinition>,
    }

    impl ProcessModel for Degenerate {
        fn interface(&self, ifc: &mut Interface) -> Result<(), AssemblyError> {
            ifc.parameter("T", 25.0, "degC")?;
            Ok(())
        }

        fn define(&self, ctx: &mut ModelContext) -> Result<(), AssemblyError> {
            let feed = ctx.create_flow("feed", &self.definition)?;
            let t = feed.property("T")?;
            let target = ctx.parameter("T")?;
            ctx.add_residual("T", (&t - &target)?, "K", 1e-7)?;
            ctx.add_residual("T2", (&t - &target)?, "K", 1e-7)?;
            ctx.add_residual("p", (feed.property("p")? - Quantity::new(1.0, "bar").unwrap())?, "bar", 1e-7)?;
            Ok(())
        }
    }

    #[test]
    fn singular_jacobians_name_the_degenerate_variables() {
        let tree = build(
            &Degenerate {
                definition: methane_definition(),
            },
            "model",
        )
        .unwrap();
        let handler = NumericHandler::new(tree).unwrap();
        let mut solver = SimulationSolver::new(handler);
        match solver.solve() {
            Err(SolverError::SingularJacobian { suspects }) => {
                assert!(!suspects.is_empty());
                assert!(
                    suspects.iter().any(|s| s.contains("n[CH4]")),
                    "suspects: {suspects:?}"
                );
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn state_round_trips_through_export_and_import() {
        let tree = build(
            &Source {
                definition: methane_definition(),
            },
            "model",
        )
        .unwrap();
        let mut handler = NumericHandler::new(tree).unwrap();
        let before = handler.state().unwrap().clone();
        let exported = handler.export_state().unwrap();
        // perturb, then restore
        handler.state().unwrap()[0] = 999.0;
        handler.import_state(&exported).unwrap();
        let after = handler.state().unwrap().clone();
        for (a, b) in before.iter().zip(&after) {
            assert!((a - b).abs() < 1e-9 * b.abs().max(1.0));
        }
        // the export carries readable quantity strings
        let text = exported["thermo"]["model/feed"]["T"].as_str().unwrap();
        assert!(text.ends_with("K"));
    }

    #[test]
    fn jacobian_matches_central_differences() {
        let tree = build(
            &Source {
                definition: methane_definition(),
            },
            "model",
        )
        .unwrap();
        let mut handler = NumericHandler::new(tree).unwrap();
        let x = handler.state().unwrap().clone();
        let (_, jacobian) = handler.residual_system(&x).unwrap();
        for column in 0..x.len() {
            let h = 1e-6 * x[column].abs().max(1.0);
            let mut plus = x.clone();
            plus[column] += h;
            let mut minus = x.clone();
            minus[column] -= h;
            let (r_plus, _) = handler.residual_system(&plus).unwrap();
            let (r_minus, _) = handler.residual_system(&minus).unwrap();
            for row in 0..r_plus.len() {
                let numeric = (r_plus[row] - r_minus[row]) / (2.0 * h);
                let analytic = jacobian.get(row, column);
                let scale = analytic.abs().max(numeric.abs()).max(1.0);
                assert!(
                    (numeric - analytic).abs() / scale < 1e-4,
                    "({row},{column}): {numeric} vs {analytic}"
                );
            }
        }
    }

    #[test]
    fn arguments_can_be_edited_before_the_solve() {
        let tree = build(
            &Source {
                definition: methane_definition(),
            },
            "model",
        )
        .unwrap();
        let handler = NumericHandler::new(tree).unwrap();
        let mut solver = SimulationSolver::new(handler);
        // halve the requested volume flow: the molar flow halves with it
        let arguments = solver.handler_mut().arguments_mut().unwrap();
        if let Nested::Map(map) = &mut arguments.model_params {
            let model = map.get_mut("model").unwrap();
            if let Nested::Map(model) = model {
                model.insert(
                    "V".to_string(),
                    Nested::Leaf(Quantity::new(5.0, "m**3/h").unwrap()),
                );
            }
        }
        let report = solver.solve().unwrap();
        assert!(report.converged());
        assert!((report.state[2] - 0.056027).abs() < 1e-5);
    }
}
