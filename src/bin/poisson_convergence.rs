use msgpass::{mpi_finalize, mpi_init_thread, Communicator, MpiThread};
use russell_lab::{Stopwatch, StrError};
use std::fmt;
use structopt::StructOpt;
use structured_poisson::{log_level, solve_poisson, KspOptions, KspType, LogStages, PcType};

// Approximate (with the Finite Differences Method, FDM) the solution of
//
//   ∂²u   ∂²u
// - ——— - ——— = 2 [(1 - 6x²) y² (1 - y²) + (1 - 6y²) x² (1 - x²)]
//   ∂x²   ∂y²
//
// on a (1.0 × 1.0) square with the homogeneous boundary conditions,
// on a sequence of grids with halved spacing.
//
// The analytical solution is:
//
// u(x, y) = x² (1 - x²) y² (y² - 1)
//
// The five-point stencil is second-order accurate; thus the error ratio
// between successive grids approaches 4.

#[derive(StructOpt)]
struct Options {
    /// Number of points along each direction of the coarsest grid
    #[structopt(long, default_value = "9")]
    coarse: usize,

    /// Number of grids
    #[structopt(long, default_value = "5")]
    levels: usize,

    /// Krylov method: cg, gmres, richardson or preonly
    #[structopt(long = "ksp_type", default_value = "cg")]
    ksp_type: KspType,

    /// Preconditioner: none, jacobi or lu
    #[structopt(long = "pc_type", default_value = "jacobi")]
    pc_type: PcType,

    /// Relative decrease of the residual norm
    #[structopt(long = "ksp_rtol", default_value = "1e-10")]
    ksp_rtol: f64,

    /// Increases the verbosity of the log messages (-v, -vv, -vvv)
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u8,
}

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
    if opt.coarse < 3 {
        return Err("the coarsest grid must have at least 3 points along each direction");
    }
    tracing_subscriber::fmt()
        .with_max_level(log_level(opt.verbose))
        .with_writer(std::io::stderr)
        .init();

    // start stopwatch
    let mut stopwatch = Stopwatch::new("");

    // message
    if rank == ROOT {
        println!("size = {}, ksp_type = {}, pc_type = {}", size, opt.ksp_type, opt.pc_type);
    }

    // solve on successively refined grids
    let mut errors = Vec::with_capacity(opt.levels);
    let mut n = opt.coarse;
    for _ in 0..opt.levels {
        let ksp_options = KspOptions {
            ksp_type: opt.ksp_type,
            pc_type: opt.pc_type,
            rtol: opt.ksp_rtol,
            ..Default::default()
        };
        let mut stages = LogStages::new();
        let run = solve_poisson(&mut comm, n, n, None, None, ksp_options, &mut stages)?;
        if rank == ROOT {
            let ratio = match errors.last() {
                Some(previous) => format!("{:6.2}", previous / run.error_inf),
                None => "     -".to_string(),
            };
            println!(
                "n = {:>5}, iterations = {:>5}, error = {:10.4e}, ratio = {}",
                n, run.report.iterations, run.error_inf, ratio
            );
        }
        errors.push(run.error_inf);
        n = 2 * n - 1;
    }

    // message
    if rank == ROOT {
        println!("errors ={}", P(errors));
        stopwatch.stop();
        println!("elapsed time = {}", stopwatch);
    }

    // finalize the MPI engine
    mpi_finalize()
}

struct P(Vec<f64>);

impl fmt::Display for P {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for v in &self.0 {
            write!(f, "{:8.1e}", v)?;
        }
        Ok(())
    }
}
