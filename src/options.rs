use crate::{KspOptions, KspType, PcType, StrError};
use structopt::StructOpt;

/// Holds the command line options of the Poisson solver
///
/// The names follow the options database keys of the classic DMDA/KSP examples,
/// e.g., `--da_grid_x 1025 --ksp_type cg --log_summary`.
#[derive(Debug, StructOpt)]
#[structopt(
    name = "poisson",
    about = "Solves a structured-grid Poisson problem with a distributed array and a Krylov solver"
)]
pub struct Options {
    /// Number of grid points along x
    #[structopt(long = "da_grid_x", default_value = "9")]
    pub da_grid_x: usize,

    /// Number of grid points along y
    #[structopt(long = "da_grid_y", default_value = "9")]
    pub da_grid_y: usize,

    /// Number of processes along x (decided if omitted)
    #[structopt(long = "da_processors_x")]
    pub da_processors_x: Option<usize>,

    /// Number of processes along y (decided if omitted)
    #[structopt(long = "da_processors_y")]
    pub da_processors_y: Option<usize>,

    /// Krylov method: cg, gmres, richardson or preonly
    #[structopt(long = "ksp_type", default_value = "gmres")]
    pub ksp_type: KspType,

    /// Preconditioner: none, jacobi or lu
    #[structopt(long = "pc_type", default_value = "jacobi")]
    pub pc_type: PcType,

    /// Relative decrease of the residual norm
    #[structopt(long = "ksp_rtol", default_value = "1e-5")]
    pub ksp_rtol: f64,

    /// Absolute size of the residual norm
    #[structopt(long = "ksp_atol", default_value = "1e-50")]
    pub ksp_atol: f64,

    /// Relative increase of the residual norm indicating divergence
    #[structopt(long = "ksp_dtol", default_value = "1e5")]
    pub ksp_dtol: f64,

    /// Maximum number of iterations
    #[structopt(long = "ksp_max_it", default_value = "10000")]
    pub ksp_max_it: usize,

    /// Size of the Krylov basis before GMRES restarts
    #[structopt(long = "ksp_gmres_restart", default_value = "30")]
    pub ksp_gmres_restart: usize,

    /// Damping of the Richardson update
    #[structopt(long = "ksp_richardson_scale", default_value = "1.0")]
    pub ksp_richardson_scale: f64,

    /// Starts the solver from the values in the solution vector
    #[structopt(long = "ksp_initial_guess_nonzero")]
    pub ksp_initial_guess_nonzero: bool,

    /// Prints the residual norm at each iteration
    #[structopt(long = "ksp_monitor")]
    pub ksp_monitor: bool,

    /// Prints why the solver stopped
    #[structopt(long = "ksp_converged_reason")]
    pub ksp_converged_reason: bool,

    /// Prints the time and flops spent in each stage
    #[structopt(long = "log_summary", alias = "log_view")]
    pub log_summary: bool,

    /// Saves a contour plot of the solution and of the error (e.g., poisson.svg)
    #[structopt(long)]
    pub plot: Option<String>,

    /// Increases the verbosity of the log messages (-v, -vv, -vvv)
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: u8,
}

impl Options {
    /// Checks the option values
    pub fn validate(&self) -> Result<(), StrError> {
        if self.da_grid_x < 2 {
            return Err("da_grid_x must be ≥ 2");
        }
        if self.da_grid_y < 2 {
            return Err("da_grid_y must be ≥ 2");
        }
        if self.da_processors_x == Some(0) {
            return Err("da_processors_x must be ≥ 1");
        }
        if self.da_processors_y == Some(0) {
            return Err("da_processors_y must be ≥ 1");
        }
        Ok(())
    }

    /// Returns the solver parameters
    pub fn ksp_options(&self) -> KspOptions {
        KspOptions {
            ksp_type: self.ksp_type,
            pc_type: self.pc_type,
            rtol: self.ksp_rtol,
            atol: self.ksp_atol,
            dtol: self.ksp_dtol,
            max_it: self.ksp_max_it,
            gmres_restart: self.ksp_gmres_restart,
            richardson_scale: self.ksp_richardson_scale,
            monitor: self.ksp_monitor,
            initial_guess_nonzero: self.ksp_initial_guess_nonzero,
        }
    }

    /// Returns the maximum log level corresponding to the verbosity
    pub fn log_level(&self) -> tracing::Level {
        log_level(self.verbose)
    }
}

/// Maps the number of -v flags to the maximum log level
pub fn log_level(verbose: u8) -> tracing::Level {
    match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
