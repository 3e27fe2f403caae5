use crate::vector::{axpy, norm_inf};
use crate::{
    form_dirichlet_laplacian, form_exact, form_rhs, DistributedArray2d, Ksp, KspOptions, LogStages, Messenger,
    SolveReport, StrError,
};
use russell_lab::Vector;
use tracing::info;

/// Holds the outcome of one Poisson solve
pub struct PoissonRun {
    pub da: DistributedArray2d, // grid and decomposition
    pub u: Vector,              // numerical solution (owned points)
    pub uexact: Vector,         // exact solution (owned points)
    pub error_inf: f64,         // ‖u - uexact‖∞ over all processes
    pub report: SolveReport,    // solver statistics
}

/// Assembles and solves the Poisson problem on a `mx × my` grid of the unit square
///
/// The assembly runs in the "Matrix Assembly" stage and the solve in the "Solve" stage.
///
/// # Input
///
/// * `comm` -- communicator shared by all processes
/// * `mx`, `my` -- number of grid points along x and y (≥ 2)
/// * `px`, `py` -- number of processes along x and y (None means decide)
/// * `ksp_options` -- solver parameters
/// * `stages` -- performance log
pub fn solve_poisson<C: Messenger>(
    comm: &mut C,
    mx: usize,
    my: usize,
    px: Option<usize>,
    py: Option<usize>,
    ksp_options: KspOptions,
    stages: &mut LogStages,
) -> Result<PoissonRun, StrError> {
    // grid
    let mut da = DistributedArray2d::new(comm, mx, my, px, py)?;
    da.set_uniform_coordinates(0.0, 1.0, 0.0, 1.0)?;

    // right-hand side, approximate solution, exact solution
    let mut b = da.create_global_vector();
    let mut u = da.create_global_vector();
    let mut uexact = da.create_global_vector();
    form_exact(&da, &mut uexact)?;
    form_rhs(&da, &mut b)?;

    // assemble linear system
    let assembly = stages.register("Matrix Assembly");
    stages.push(assembly)?;
    let aa = form_dirichlet_laplacian(&da, 1.0)?;
    stages.pop()?;

    // solve
    let ksp = Ksp::new(ksp_options)?;
    let solve = stages.register("Solve");
    stages.push(solve)?;
    let report = ksp.solve(comm, &da, &aa, &b, &mut u)?;
    stages.add_flops(report.flops);
    stages.pop()?;

    // numerical error
    let mut diff = u.clone();
    axpy(&mut diff, -1.0, &uexact)?;
    let error_inf = norm_inf(comm, &diff)?;
    info!(mx, my, error_inf, "solved Poisson problem");
    Ok(PoissonRun {
        da,
        u,
        uexact,
        error_inf,
        report,
    })
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::solve_poisson;
    use crate::{KspOptions, KspType, LogStages, PcType, SerialComm};

    #[test]
    fn solve_poisson_works() {
        let mut comm = SerialComm;
        let mut stages = LogStages::new();
        let options = KspOptions {
            ksp_type: KspType::Cg,
            pc_type: PcType::None,
            rtol: 1e-10,
            ..Default::default()
        };
        let run = solve_poisson(&mut comm, 9, 9, None, None, options, &mut stages).unwrap();
        assert!(run.report.reason.is_converged());
        assert!(run.error_inf > 1e-4 && run.error_inf < 2e-3);
        assert_eq!(run.u.dim(), 81);
        assert_eq!(run.uexact.dim(), 81);
        assert_eq!(run.da.local_info().mx, 9);
        let summary = stages.summary(&mut comm).unwrap();
        assert_eq!(summary.len(), 3);
        assert_eq!(summary[1].name, "Matrix Assembly");
        assert_eq!(summary[2].name, "Solve");
        assert_eq!(summary[2].flops, run.report.flops);
    }
}
