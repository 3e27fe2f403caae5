use msgpass::{mpi_finalize, mpi_init_thread, Communicator, MpiThread};
use structopt::StructOpt;
use structured_poisson::{format_summary, plot_solution, solve_poisson, LogStages, Options, StrError};

// Solves a structured-grid Poisson problem with a distributed array and a Krylov solver
//
// PERFORMANCE ANALYSIS:
//
//   cargo build --release
//   mpiexec -n 6 target/release/poisson --da_grid_x 1025 --da_grid_y 1025 --ksp_type cg --log_summary | grep "Solve: "
//
// WEAK SCALING IN TERMS OF FLOPS ONLY:
//
//   for kk in 0 1 2 3; do NN=$((50*(2**$kk))); MM=$((2**(2*$kk))); \
//     mpiexec -n $MM target/release/poisson --da_grid_x $NN --da_grid_y $NN --ksp_rtol 1.0e-8 --ksp_type cg --log_summary \
//     | grep "Flops: "; done

const ROOT: usize = 0;

fn main() -> Result<(), StrError> {
    // initialize the MPI engine
    mpi_init_thread(MpiThread::Serialized)?;

    // allocate MPI communicator and determine this processor's rank
    let mut comm = Communicator::new()?;
    let rank = comm.rank()?;
    let size = comm.size()?;

    // parse command line arguments
    let opt = Options::from_args();
    opt.validate()?;
    tracing_subscriber::fmt()
        .with_max_level(opt.log_level())
        .with_writer(std::io::stderr)
        .init();

    // assemble and solve
    let mut stages = LogStages::new();
    let run = solve_poisson(
        &mut comm,
        opt.da_grid_x,
        opt.da_grid_y,
        opt.da_processors_x,
        opt.da_processors_y,
        opt.ksp_options(),
        &mut stages,
    )?;

    // report on grid and numerical error
    let info = run.da.local_info();
    if opt.ksp_converged_reason && rank == ROOT {
        println!(
            "Linear solve {} due to {} iterations {}",
            if run.report.reason.is_converged() { "converged" } else { "did not converge" },
            run.report.reason,
            run.report.iterations
        );
    }
    if rank == ROOT {
        println!(
            "on {} x {} grid:  error |u-uexact|_inf = {:e}",
            info.mx, info.my, run.error_inf
        );
    }

    // performance summary
    if opt.log_summary {
        let summary = stages.summary(&mut comm)?;
        if rank == ROOT {
            println!("{}", format_summary(&summary, size));
        }
    }

    // plot
    if let Some(path) = &opt.plot {
        let mut error = run.u.clone();
        structured_poisson::vector::axpy(&mut error, -1.0, &run.uexact)?;
        let solution = run.da.gather_natural(&mut comm, &run.u)?;
        let error = run.da.gather_natural(&mut comm, &error)?;
        if let (Some(solution), Some(error)) = (solution, error) {
            plot_solution(&run.da, &solution, &error, path)?;
        }
    }

    // finalize the MPI engine
    mpi_finalize()
}
