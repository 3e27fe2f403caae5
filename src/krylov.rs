use crate::vector::{axpy, dot, norm2, pointwise_mult};
use crate::{DistributedArray2d, Messenger, StencilMatrix, StrError};
use russell_lab::{vec_add, vec_copy, Vector};
use russell_sparse::{Genie, LinSolver, SparseMatrix};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

const ROOT: usize = 0;

/// Defines the Krylov (or stationary) method
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KspType {
    /// Preconditioned conjugate gradients (requires a symmetric positive definite system)
    Cg,

    /// Restarted GMRES with left preconditioning
    Gmres,

    /// Preconditioned Richardson iteration x ← x + scale ⋅ M⁻¹ (b - A ⋅ x)
    Richardson,

    /// Applies the preconditioner once
    Preonly,
}

/// Defines the preconditioner
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PcType {
    None,
    Jacobi,

    /// Sparse LU factorization (single process only)
    Lu,
}

/// Tells why the solver stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvergedReason {
    ConvergedRtol,
    ConvergedAtol,
    ConvergedIts,
    DivergedIts,
    DivergedDtol,
    DivergedBreakdown,
    DivergedIndefiniteMat,
    DivergedIndefinitePc,
    DivergedNanOrInf,
}

impl FromStr for KspType {
    type Err = StrError;
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_lowercase().as_str() {
            "cg" => Ok(KspType::Cg),
            "gmres" => Ok(KspType::Gmres),
            "richardson" => Ok(KspType::Richardson),
            "preonly" => Ok(KspType::Preonly),
            _ => Err("unknown ksp type; use cg, gmres, richardson or preonly"),
        }
    }
}

impl FromStr for PcType {
    type Err = StrError;
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_lowercase().as_str() {
            "none" => Ok(PcType::None),
            "jacobi" => Ok(PcType::Jacobi),
            "lu" => Ok(PcType::Lu),
            _ => Err("unknown pc type; use none, jacobi or lu"),
        }
    }
}

impl fmt::Display for KspType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KspType::Cg => write!(f, "cg"),
            KspType::Gmres => write!(f, "gmres"),
            KspType::Richardson => write!(f, "richardson"),
            KspType::Preonly => write!(f, "preonly"),
        }
    }
}

impl fmt::Display for PcType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PcType::None => write!(f, "none"),
            PcType::Jacobi => write!(f, "jacobi"),
            PcType::Lu => write!(f, "lu"),
        }
    }
}

impl ConvergedReason {
    /// Tells whether the reason indicates convergence
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            ConvergedReason::ConvergedRtol | ConvergedReason::ConvergedAtol | ConvergedReason::ConvergedIts
        )
    }
}

impl fmt::Display for ConvergedReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ConvergedReason::ConvergedRtol => "CONVERGED_RTOL",
            ConvergedReason::ConvergedAtol => "CONVERGED_ATOL",
            ConvergedReason::ConvergedIts => "CONVERGED_ITS",
            ConvergedReason::DivergedIts => "DIVERGED_ITS",
            ConvergedReason::DivergedDtol => "DIVERGED_DTOL",
            ConvergedReason::DivergedBreakdown => "DIVERGED_BREAKDOWN",
            ConvergedReason::DivergedIndefiniteMat => "DIVERGED_INDEFINITE_MAT",
            ConvergedReason::DivergedIndefinitePc => "DIVERGED_INDEFINITE_PC",
            ConvergedReason::DivergedNanOrInf => "DIVERGED_NANORINF",
        };
        write!(f, "{}", name)
    }
}

/// Holds the solver parameters
#[derive(Clone, Debug)]
pub struct KspOptions {
    pub ksp_type: KspType,
    pub pc_type: PcType,
    pub rtol: f64,                   // relative decrease of the residual norm
    pub atol: f64,                   // absolute size of the residual norm
    pub dtol: f64,                   // relative increase indicating divergence
    pub max_it: usize,               // maximum number of iterations
    pub gmres_restart: usize,        // size of the Krylov basis before restarting
    pub richardson_scale: f64,       // damping of the Richardson update
    pub monitor: bool,               // print the residual norm at each iteration
    pub initial_guess_nonzero: bool, // use the incoming x as initial guess; rtol then refers to ‖M⁻¹ b‖
}

impl Default for KspOptions {
    fn default() -> Self {
        KspOptions {
            ksp_type: KspType::Gmres,
            pc_type: PcType::Jacobi,
            rtol: 1e-5,
            atol: 1e-50,
            dtol: 1e5,
            max_it: 10000,
            gmres_restart: 30,
            richardson_scale: 1.0,
            monitor: false,
            initial_guess_nonzero: false,
        }
    }
}

/// Holds the results of a solve
#[derive(Clone, Copy, Debug)]
pub struct SolveReport {
    pub iterations: usize,
    pub reason: ConvergedReason,
    pub residual_norm: f64, // preconditioned residual norm; true residual norm for preonly
    pub flops: f64,         // floating point operations on this process
}

/// Applies z := M⁻¹ ⋅ r and returns the number of floating point operations
type Preconditioner<'a> = Box<dyn FnMut(&mut Vector, &Vector) -> Result<f64, StrError> + 'a>;

/// Implements the linear solver context for the distributed stencil matrix
pub struct Ksp {
    options: KspOptions,
}

impl Ksp {
    /// Allocates a new instance
    pub fn new(options: KspOptions) -> Result<Self, StrError> {
        if !(options.rtol >= 0.0 && options.rtol < 1.0) {
            return Err("rtol must satisfy 0 ≤ rtol < 1");
        }
        if options.atol < 0.0 {
            return Err("atol must be ≥ 0");
        }
        if options.dtol <= 1.0 {
            return Err("dtol must be > 1");
        }
        if options.max_it == 0 {
            return Err("max_it must be ≥ 1");
        }
        if options.gmres_restart == 0 {
            return Err("gmres_restart must be ≥ 1");
        }
        if options.richardson_scale <= 0.0 {
            return Err("richardson_scale must be > 0");
        }
        Ok(Ksp { options })
    }

    /// Returns the solver parameters
    pub fn options(&self) -> &KspOptions {
        &self.options
    }

    /// Solves A ⋅ x = b
    ///
    /// `x` is zeroed first unless `initial_guess_nonzero` is set.
    pub fn solve<C: Messenger>(
        &self,
        comm: &mut C,
        da: &DistributedArray2d,
        aa: &StencilMatrix,
        b: &Vector,
        x: &mut Vector,
    ) -> Result<SolveReport, StrError> {
        let n = aa.nrow();
        if b.dim() != n {
            return Err("b vector has the wrong dimension");
        }
        if x.dim() != n {
            return Err("x vector has the wrong dimension");
        }
        if !self.options.initial_guess_nonzero {
            x.as_mut_data().fill(0.0);
        }
        let mut pc = self.setup_preconditioner(comm, da, aa)?;
        let reference = if self.options.initial_guess_nonzero {
            let mut z = Vector::new(n);
            pc(&mut z, b)?;
            Some(norm2(comm, &z)?)
        } else {
            None
        };
        let mut monitor = Monitor {
            enabled: self.options.monitor && comm.rank()? == ROOT,
        };
        info!(ksp_type = %self.options.ksp_type, pc_type = %self.options.pc_type, n, "solving");
        let report = match self.options.ksp_type {
            KspType::Cg => self.cg(comm, da, aa, &mut pc, &mut monitor, reference, b, x)?,
            KspType::Gmres => self.gmres(comm, da, aa, &mut pc, &mut monitor, reference, b, x)?,
            KspType::Richardson => self.richardson(comm, da, aa, &mut pc, &mut monitor, reference, b, x)?,
            KspType::Preonly => self.preonly(comm, da, aa, &mut pc, b, x)?,
        };
        info!(
            iterations = report.iterations,
            reason = %report.reason,
            residual_norm = report.residual_norm,
            "solve finished"
        );
        Ok(report)
    }

    /// Builds the preconditioner from the assembled matrix
    fn setup_preconditioner<'a, C: Messenger>(
        &self,
        comm: &mut C,
        da: &DistributedArray2d,
        aa: &StencilMatrix,
    ) -> Result<Preconditioner<'a>, StrError> {
        match self.options.pc_type {
            PcType::None => Ok(Box::new(|z: &mut Vector, r: &Vector| -> Result<f64, StrError> {
                vec_copy(z, r)?;
                Ok(0.0)
            })),
            PcType::Jacobi => {
                let mut inv_diag = aa.diagonal();
                let mut any_zero = [0.0];
                for k in 0..inv_diag.dim() {
                    if inv_diag[k] == 0.0 {
                        any_zero[0] = 1.0;
                    } else {
                        inv_diag[k] = 1.0 / inv_diag[k];
                    }
                }
                comm.allreduce_max(&mut any_zero)?;
                if any_zero[0] != 0.0 {
                    return Err("zero diagonal entry; cannot use the Jacobi preconditioner");
                }
                Ok(Box::new(move |z: &mut Vector, r: &Vector| -> Result<f64, StrError> {
                    pointwise_mult(z, &inv_diag, r)?;
                    Ok(inv_diag.dim() as f64)
                }))
            }
            PcType::Lu => {
                if comm.size()? != 1 {
                    return Err("the LU preconditioner requires a single process");
                }
                let coo = aa.to_coo(da)?;
                let mut mat = SparseMatrix::from_coo(coo);
                let mut solver = LinSolver::new(Genie::Umfpack)?;
                solver.actual.factorize(&mut mat, None)?;
                debug!("factorized matrix with UMFPACK");
                Ok(Box::new(move |z: &mut Vector, r: &Vector| -> Result<f64, StrError> {
                    solver.actual.solve(z, &mat, r, false)?;
                    Ok(0.0)
                }))
            }
        }
    }

    /// Checks the residual norm against the tolerances
    fn converged(&self, iteration: usize, rnorm: f64, rnorm0: f64) -> Option<ConvergedReason> {
        if !rnorm.is_finite() {
            return Some(ConvergedReason::DivergedNanOrInf);
        }
        let ttol = f64::max(self.options.rtol * rnorm0, self.options.atol);
        if rnorm <= ttol {
            return if rnorm < self.options.atol {
                Some(ConvergedReason::ConvergedAtol)
            } else {
                Some(ConvergedReason::ConvergedRtol)
            };
        }
        if rnorm0 > 0.0 && rnorm > self.options.dtol * rnorm0 {
            return Some(ConvergedReason::DivergedDtol);
        }
        if iteration >= self.options.max_it {
            return Some(ConvergedReason::DivergedIts);
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    fn cg<C: Messenger>(
        &self,
        comm: &mut C,
        da: &DistributedArray2d,
        aa: &StencilMatrix,
        pc: &mut Preconditioner,
        monitor: &mut Monitor,
        reference: Option<f64>,
        b: &Vector,
        x: &mut Vector,
    ) -> Result<SolveReport, StrError> {
        let n = b.dim() as f64;
        let mut r = Vector::new(b.dim());
        let mut z = Vector::new(b.dim());
        let mut q = Vector::new(b.dim());
        let mut flops = residual(comm, da, aa, &mut r, b, x)?;
        flops += pc(&mut z, &r)?;
        let rnorm = norm2(comm, &z)?;
        flops += 2.0 * n;
        monitor.print(0, rnorm);
        let rnorm0 = reference.unwrap_or(rnorm);
        if let Some(reason) = self.converged(0, rnorm, rnorm0) {
            return Ok(report(0, reason, rnorm, flops));
        }
        let mut p = z.clone();
        let mut rz = dot(comm, &r, &z)?;
        flops += 2.0 * n;
        let mut k = 0;
        loop {
            k += 1;
            flops += aa.mat_vec(comm, da, &mut q, &p)?;
            let pq = dot(comm, &p, &q)?;
            flops += 2.0 * n;
            if pq <= 0.0 {
                let reason = if pq == 0.0 {
                    ConvergedReason::DivergedBreakdown
                } else {
                    ConvergedReason::DivergedIndefiniteMat
                };
                return Ok(report(k - 1, reason, f64::NAN, flops));
            }
            let alpha = rz / pq;
            axpy(x, alpha, &p)?;
            axpy(&mut r, -alpha, &q)?;
            flops += 4.0 * n;
            flops += pc(&mut z, &r)?;
            let rnorm = norm2(comm, &z)?;
            flops += 2.0 * n;
            monitor.print(k, rnorm);
            if let Some(reason) = self.converged(k, rnorm, rnorm0) {
                return Ok(report(k, reason, rnorm, flops));
            }
            let rz_new = dot(comm, &r, &z)?;
            if rz_new < 0.0 {
                return Ok(report(k, ConvergedReason::DivergedIndefinitePc, rnorm, flops));
            }
            let beta = rz_new / rz;
            rz = rz_new;
            for i in 0..p.dim() {
                p[i] = z[i] + beta * p[i];
            }
            flops += 4.0 * n;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn gmres<C: Messenger>(
        &self,
        comm: &mut C,
        da: &DistributedArray2d,
        aa: &StencilMatrix,
        pc: &mut Preconditioner,
        monitor: &mut Monitor,
        reference: Option<f64>,
        b: &Vector,
        x: &mut Vector,
    ) -> Result<SolveReport, StrError> {
        let dim = b.dim();
        let n = dim as f64;
        let m = self.options.gmres_restart;
        let mut basis: Vec<Vector> = (0..(m + 1)).map(|_| Vector::new(dim)).collect();
        let mut hh = vec![vec![0.0; m]; m + 1]; // Hessenberg matrix, rotated into upper triangular form
        let mut cs = vec![0.0; m];
        let mut sn = vec![0.0; m];
        let mut g = vec![0.0; m + 1];
        let mut r = Vector::new(dim);
        let mut w = Vector::new(dim);
        let mut flops = 0.0;
        let mut iterations = 0;
        let mut rnorm0 = 0.0;
        loop {
            // preconditioned residual
            flops += residual(comm, da, aa, &mut w, b, x)?;
            flops += pc(&mut r, &w)?;
            let beta = norm2(comm, &r)?;
            flops += 2.0 * n;
            if iterations == 0 {
                rnorm0 = reference.unwrap_or(beta);
                monitor.print(0, beta);
            }
            if let Some(reason) = self.converged(iterations, beta, rnorm0) {
                return Ok(report(iterations, reason, beta, flops));
            }
            for k in 0..dim {
                basis[0][k] = r[k] / beta;
            }
            g.iter_mut().for_each(|v| *v = 0.0);
            g[0] = beta;

            // Arnoldi process with modified Gram-Schmidt
            let mut reason = None;
            let mut rnorm = beta;
            let mut ncol = 0;
            for j in 0..m {
                flops += aa.mat_vec(comm, da, &mut r, &basis[j])?;
                flops += pc(&mut w, &r)?;
                for i in 0..=j {
                    hh[i][j] = dot(comm, &w, &basis[i])?;
                    axpy(&mut w, -hh[i][j], &basis[i])?;
                    flops += 4.0 * n;
                }
                let hnext = norm2(comm, &w)?;
                flops += 2.0 * n;
                hh[j + 1][j] = hnext;
                for i in 0..j {
                    let temp = cs[i] * hh[i][j] + sn[i] * hh[i + 1][j];
                    hh[i + 1][j] = -sn[i] * hh[i][j] + cs[i] * hh[i + 1][j];
                    hh[i][j] = temp;
                }
                let denom = f64::hypot(hh[j][j], hh[j + 1][j]);
                if denom == 0.0 {
                    reason = Some(ConvergedReason::DivergedBreakdown);
                    break;
                }
                cs[j] = hh[j][j] / denom;
                sn[j] = hh[j + 1][j] / denom;
                hh[j][j] = denom;
                hh[j + 1][j] = 0.0;
                g[j + 1] = -sn[j] * g[j];
                g[j] = cs[j] * g[j];
                rnorm = f64::abs(g[j + 1]);
                ncol = j + 1;
                iterations += 1;
                monitor.print(iterations, rnorm);
                reason = self.converged(iterations, rnorm, rnorm0);
                if reason.is_some() || hnext == 0.0 {
                    break;
                }
                for k in 0..dim {
                    basis[j + 1][k] = w[k] / hnext;
                }
            }

            // update the solution with the least-squares minimizer
            let mut y = vec![0.0; ncol];
            for i in (0..ncol).rev() {
                let sum: f64 = ((i + 1)..ncol).map(|l| hh[i][l] * y[l]).sum();
                y[i] = (g[i] - sum) / hh[i][i];
            }
            for (i, yi) in y.iter().enumerate() {
                axpy(x, *yi, &basis[i])?;
                flops += 2.0 * n;
            }
            if let Some(reason) = reason {
                return Ok(report(iterations, reason, rnorm, flops));
            }
            debug!(iterations, rnorm, "restarting GMRES");
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn richardson<C: Messenger>(
        &self,
        comm: &mut C,
        da: &DistributedArray2d,
        aa: &StencilMatrix,
        pc: &mut Preconditioner,
        monitor: &mut Monitor,
        reference: Option<f64>,
        b: &Vector,
        x: &mut Vector,
    ) -> Result<SolveReport, StrError> {
        let n = b.dim() as f64;
        let mut r = Vector::new(b.dim());
        let mut z = Vector::new(b.dim());
        let mut flops = 0.0;
        let mut rnorm0 = 0.0;
        let mut k = 0;
        loop {
            flops += residual(comm, da, aa, &mut r, b, x)?;
            flops += pc(&mut z, &r)?;
            let rnorm = norm2(comm, &z)?;
            flops += 2.0 * n;
            if k == 0 {
                rnorm0 = reference.unwrap_or(rnorm);
            }
            monitor.print(k, rnorm);
            if let Some(reason) = self.converged(k, rnorm, rnorm0) {
                return Ok(report(k, reason, rnorm, flops));
            }
            axpy(x, self.options.richardson_scale, &z)?;
            flops += 2.0 * n;
            k += 1;
        }
    }

    fn preonly<C: Messenger>(
        &self,
        comm: &mut C,
        da: &DistributedArray2d,
        aa: &StencilMatrix,
        pc: &mut Preconditioner,
        b: &Vector,
        x: &mut Vector,
    ) -> Result<SolveReport, StrError> {
        let mut flops = pc(&mut *x, b)?;
        let mut r = Vector::new(b.dim());
        flops += residual(comm, da, aa, &mut r, b, x)?;
        let rnorm = norm2(comm, &r)?;
        Ok(report(1, ConvergedReason::ConvergedIts, rnorm, flops))
    }
}

/// Prints the residual norms on the root process
struct Monitor {
    enabled: bool,
}

impl Monitor {
    fn print(&mut self, iteration: usize, rnorm: f64) {
        debug!(iteration, rnorm, "residual norm");
        if self.enabled {
            println!("{}", Monitor::line(iteration, rnorm));
        }
    }

    fn line(iteration: usize, rnorm: f64) -> String {
        format!("{:>3} KSP Residual norm {}", iteration, format_exp(rnorm, 12, 14))
    }
}

/// Formats a number in scientific notation with a signed exponent of at least two digits
///
/// Example: `format_exp(1.5e-5, 3, 12)` yields `"   1.500e-05"`.
fn format_exp(value: f64, precision: usize, width: usize) -> String {
    let rust = format!("{:.*e}", precision, value);
    let formatted = match rust.split_once('e') {
        Some((mantissa, exponent)) => match exponent.parse::<i32>() {
            Ok(e) => format!("{}e{}{:02}", mantissa, if e < 0 { '-' } else { '+' }, e.abs()),
            Err(_) => rust.clone(),
        },
        None => rust.clone(), // NaN and inf
    };
    format!("{:>width$}", formatted, width = width)
}

/// Computes r := b - A ⋅ x and returns the number of floating point operations
fn residual<C: Messenger>(
    comm: &mut C,
    da: &DistributedArray2d,
    aa: &StencilMatrix,
    r: &mut Vector,
    b: &Vector,
    x: &Vector,
) -> Result<f64, StrError> {
    let mut ax = Vector::new(b.dim());
    let flops = aa.mat_vec(comm, da, &mut ax, x)?;
    vec_add(r, 1.0, b, -1.0, &ax)?;
    Ok(flops + 3.0 * b.dim() as f64)
}

fn report(iterations: usize, reason: ConvergedReason, residual_norm: f64, flops: f64) -> SolveReport {
    SolveReport {
        iterations,
        reason,
        residual_norm,
        flops,
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::{format_exp, ConvergedReason, Ksp, KspOptions, KspType, Monitor, PcType};
    use crate::vector::norm_inf;
    use crate::{form_dirichlet_laplacian, form_exact, form_rhs, ChannelComm, DistributedArray2d, SerialComm};
    use russell_lab::{vec_approx_eq, Vector};
    use std::thread;

    fn options(ksp_type: KspType, pc_type: PcType) -> KspOptions {
        KspOptions {
            ksp_type,
            pc_type,
            rtol: 1e-10,
            ..Default::default()
        }
    }

    /// Solves the model problem and returns the solution and the max error
    fn solve_model(ksp_type: KspType, pc_type: PcType, n: usize) -> (Vector, f64, super::SolveReport) {
        let mut comm = SerialComm;
        let da = DistributedArray2d::new(&mut comm, n, n, None, None).unwrap();
        let aa = form_dirichlet_laplacian(&da, 1.0).unwrap();
        let mut b = da.create_global_vector();
        let mut u = da.create_global_vector();
        let mut uexact = da.create_global_vector();
        form_rhs(&da, &mut b).unwrap();
        form_exact(&da, &mut uexact).unwrap();
        let ksp = Ksp::new(options(ksp_type, pc_type)).unwrap();
        let rep = ksp.solve(&mut comm, &da, &aa, &b, &mut u).unwrap();
        let mut err = u.clone();
        crate::vector::axpy(&mut err, -1.0, &uexact).unwrap();
        let err_max = norm_inf(&mut comm, &err).unwrap();
        (u, err_max, rep)
    }

    #[test]
    fn parsing_and_display_work() {
        assert_eq!("CG".parse::<KspType>(), Ok(KspType::Cg));
        assert_eq!("gmres".parse::<KspType>(), Ok(KspType::Gmres));
        assert_eq!("richardson".parse::<KspType>(), Ok(KspType::Richardson));
        assert_eq!("preonly".parse::<KspType>(), Ok(KspType::Preonly));
        assert_eq!(
            "bicg".parse::<KspType>().err(),
            Some("unknown ksp type; use cg, gmres, richardson or preonly")
        );
        assert_eq!("none".parse::<PcType>(), Ok(PcType::None));
        assert_eq!("Jacobi".parse::<PcType>(), Ok(PcType::Jacobi));
        assert_eq!("lu".parse::<PcType>(), Ok(PcType::Lu));
        assert_eq!("ilu".parse::<PcType>().err(), Some("unknown pc type; use none, jacobi or lu"));
        assert_eq!(format!("{}", KspType::Gmres), "gmres");
        assert_eq!(format!("{}", PcType::Jacobi), "jacobi");
        assert_eq!(format!("{}", ConvergedReason::ConvergedRtol), "CONVERGED_RTOL");
        assert_eq!(format!("{}", ConvergedReason::DivergedIts), "DIVERGED_ITS");
        assert!(ConvergedReason::ConvergedAtol.is_converged());
        assert!(!ConvergedReason::DivergedDtol.is_converged());
    }

    #[test]
    fn new_captures_errors() {
        let bad = |f: fn(&mut KspOptions)| {
            let mut opt = KspOptions::default();
            f(&mut opt);
            Ksp::new(opt).err()
        };
        assert_eq!(bad(|o| o.rtol = 1.0), Some("rtol must satisfy 0 ≤ rtol < 1"));
        assert_eq!(bad(|o| o.atol = -1.0), Some("atol must be ≥ 0"));
        assert_eq!(bad(|o| o.dtol = 1.0), Some("dtol must be > 1"));
        assert_eq!(bad(|o| o.max_it = 0), Some("max_it must be ≥ 1"));
        assert_eq!(bad(|o| o.gmres_restart = 0), Some("gmres_restart must be ≥ 1"));
        assert_eq!(bad(|o| o.richardson_scale = 0.0), Some("richardson_scale must be > 0"));
        assert_eq!(Ksp::new(KspOptions::default()).unwrap().options().ksp_type, KspType::Gmres);
    }

    #[test]
    fn cg_solves_model_problem() {
        let (_, err_none, rep) = solve_model(KspType::Cg, PcType::None, 9);
        assert_eq!(rep.reason, ConvergedReason::ConvergedRtol);
        assert!(rep.iterations <= 49);
        let (_, err_jacobi, _) = solve_model(KspType::Cg, PcType::Jacobi, 9);
        // discretization error on the 9 x 9 grid
        assert!(err_none < 2e-3);
        assert!(f64::abs(err_none - err_jacobi) < 1e-8);
    }

    #[test]
    fn all_methods_agree() {
        let (u_ref, _, _) = solve_model(KspType::Preonly, PcType::Lu, 11);
        for (ksp_type, pc_type) in [
            (KspType::Cg, PcType::None),
            (KspType::Cg, PcType::Jacobi),
            (KspType::Gmres, PcType::None),
            (KspType::Gmres, PcType::Jacobi),
            (KspType::Cg, PcType::Lu),
            (KspType::Gmres, PcType::Lu),
        ] {
            let (u, _, rep) = solve_model(ksp_type, pc_type, 11);
            assert!(rep.reason.is_converged());
            vec_approx_eq(u.as_data(), u_ref.as_data(), 1e-8);
        }
    }

    #[test]
    fn lu_preconditioner_converges_at_once() {
        let (_, _, rep) = solve_model(KspType::Cg, PcType::Lu, 7);
        assert_eq!(rep.iterations, 1);
        let (_, _, rep) = solve_model(KspType::Preonly, PcType::Lu, 7);
        assert_eq!(rep.iterations, 1);
        assert_eq!(rep.reason, ConvergedReason::ConvergedIts);
        assert!(rep.residual_norm < 1e-12);
    }

    #[test]
    fn gmres_restarts_work() {
        let mut comm = SerialComm;
        let da = DistributedArray2d::new(&mut comm, 17, 17, None, None).unwrap();
        let aa = form_dirichlet_laplacian(&da, 1.0).unwrap();
        let mut b = da.create_global_vector();
        form_rhs(&da, &mut b).unwrap();
        let mut u_ref = da.create_global_vector();
        let ksp = Ksp::new(options(KspType::Cg, PcType::Jacobi)).unwrap();
        ksp.solve(&mut comm, &da, &aa, &b, &mut u_ref).unwrap();
        let ksp = Ksp::new(KspOptions {
            gmres_restart: 5,
            ..options(KspType::Gmres, PcType::Jacobi)
        })
        .unwrap();
        let mut u = da.create_global_vector();
        let rep = ksp.solve(&mut comm, &da, &aa, &b, &mut u).unwrap();
        assert_eq!(rep.reason, ConvergedReason::ConvergedRtol);
        assert!(rep.iterations > 5);
        vec_approx_eq(u.as_data(), u_ref.as_data(), 1e-8);
    }

    #[test]
    fn richardson_with_jacobi_converges() {
        // this is the damped Jacobi iteration
        let mut comm = SerialComm;
        let da = DistributedArray2d::new(&mut comm, 5, 5, None, None).unwrap();
        let aa = form_dirichlet_laplacian(&da, 1.0).unwrap();
        let mut b = da.create_global_vector();
        form_rhs(&da, &mut b).unwrap();
        let ksp = Ksp::new(KspOptions {
            richardson_scale: 0.5,
            rtol: 1e-8,
            ..options(KspType::Richardson, PcType::Jacobi)
        })
        .unwrap();
        let mut u = da.create_global_vector();
        let rep = ksp.solve(&mut comm, &da, &aa, &b, &mut u).unwrap();
        assert_eq!(rep.reason, ConvergedReason::ConvergedRtol);
        let mut u_ref = da.create_global_vector();
        Ksp::new(options(KspType::Preonly, PcType::Lu))
            .unwrap()
            .solve(&mut comm, &da, &aa, &b, &mut u_ref)
            .unwrap();
        vec_approx_eq(u.as_data(), u_ref.as_data(), 1e-7);
    }

    #[test]
    fn richardson_detects_divergence() {
        // the Jacobi-preconditioned operator has eigenvalues close to 2; scale 3 amplifies them
        let mut comm = SerialComm;
        let da = DistributedArray2d::new(&mut comm, 9, 9, None, None).unwrap();
        let aa = form_dirichlet_laplacian(&da, 1.0).unwrap();
        let mut b = da.create_global_vector();
        form_rhs(&da, &mut b).unwrap();
        let ksp = Ksp::new(KspOptions {
            richardson_scale: 3.0,
            ..options(KspType::Richardson, PcType::Jacobi)
        })
        .unwrap();
        let mut u = da.create_global_vector();
        let rep = ksp.solve(&mut comm, &da, &aa, &b, &mut u).unwrap();
        assert_eq!(rep.reason, ConvergedReason::DivergedDtol);
        assert!(!rep.reason.is_converged());
        assert!(rep.iterations > 0 && rep.iterations < 10000);
        assert!(rep.residual_norm.is_finite());
    }

    #[test]
    fn nonzero_initial_guess_is_kept() {
        let mut comm = SerialComm;
        let da = DistributedArray2d::new(&mut comm, 17, 17, None, None).unwrap();
        let aa = form_dirichlet_laplacian(&da, 1.0).unwrap();
        let mut b = da.create_global_vector();
        form_rhs(&da, &mut b).unwrap();
        let mut u = da.create_global_vector();
        let first = Ksp::new(options(KspType::Cg, PcType::Jacobi))
            .unwrap()
            .solve(&mut comm, &da, &aa, &b, &mut u)
            .unwrap();
        assert_eq!(first.reason, ConvergedReason::ConvergedRtol);
        assert!(first.iterations > 0);

        // restarting from the converged solution needs no iterations
        let u_converged = u.clone();
        for ksp_type in [KspType::Cg, KspType::Gmres, KspType::Richardson] {
            let ksp = Ksp::new(KspOptions {
                rtol: 1e-8,
                initial_guess_nonzero: true,
                ..options(ksp_type, PcType::Jacobi)
            })
            .unwrap();
            let rep = ksp.solve(&mut comm, &da, &aa, &b, &mut u).unwrap();
            assert_eq!(rep.iterations, 0);
            assert_eq!(rep.reason, ConvergedReason::ConvergedRtol);
            vec_approx_eq(u.as_data(), u_converged.as_data(), 1e-15);
        }

        // without the flag the guess is discarded
        let rep = Ksp::new(KspOptions {
            rtol: 1e-8,
            ..options(KspType::Cg, PcType::Jacobi)
        })
        .unwrap()
        .solve(&mut comm, &da, &aa, &b, &mut u)
        .unwrap();
        assert!(rep.iterations > 0);
    }

    #[test]
    fn format_exp_works() {
        assert_eq!(format_exp(1.5e-5, 3, 12), "   1.500e-05");
        assert_eq!(format_exp(123.456, 2, 0), "1.23e+02");
        assert_eq!(format_exp(1.0, 2, 14), "      1.00e+00");
        assert_eq!(format_exp(-2.5e-100, 1, 0), "-2.5e-100");
        assert_eq!(format_exp(f64::NAN, 2, 5), "  NaN");
    }

    #[test]
    fn monitor_line_works() {
        assert_eq!(Monitor::line(0, 1.5e-5), "  0 KSP Residual norm 1.500000000000e-05");
        assert_eq!(Monitor::line(12, 0.0), " 12 KSP Residual norm 0.000000000000e+00");
        assert_eq!(Monitor::line(123, 2.0e10), "123 KSP Residual norm 2.000000000000e+10");
    }

    #[test]
    fn max_it_and_zero_rhs_are_reported() {
        let mut comm = SerialComm;
        let da = DistributedArray2d::new(&mut comm, 17, 17, None, None).unwrap();
        let aa = form_dirichlet_laplacian(&da, 1.0).unwrap();
        let mut b = da.create_global_vector();
        let mut u = da.create_global_vector();
        let ksp = Ksp::new(options(KspType::Cg, PcType::None)).unwrap();
        let rep = ksp.solve(&mut comm, &da, &aa, &b, &mut u).unwrap();
        assert_eq!(rep.iterations, 0);
        assert_eq!(rep.reason, ConvergedReason::ConvergedAtol);
        form_rhs(&da, &mut b).unwrap();
        let ksp = Ksp::new(KspOptions {
            max_it: 3,
            ..options(KspType::Cg, PcType::None)
        })
        .unwrap();
        let rep = ksp.solve(&mut comm, &da, &aa, &b, &mut u).unwrap();
        assert_eq!(rep.iterations, 3);
        assert_eq!(rep.reason, ConvergedReason::DivergedIts);
        assert!(rep.flops > 0.0);
    }

    #[test]
    fn cg_detects_indefinite_matrix() {
        let mut comm = SerialComm;
        let da = DistributedArray2d::new(&mut comm, 5, 5, None, None).unwrap();
        let aa = form_dirichlet_laplacian(&da, -1.0).unwrap();
        let mut b = da.create_global_vector();
        b.as_mut_data().fill(1.0);
        let mut u = da.create_global_vector();
        let rep = Ksp::new(options(KspType::Cg, PcType::None))
            .unwrap()
            .solve(&mut comm, &da, &aa, &b, &mut u)
            .unwrap();
        assert_eq!(rep.reason, ConvergedReason::DivergedIndefiniteMat);
    }

    #[test]
    fn solve_captures_errors() {
        let mut comm = SerialComm;
        let da = DistributedArray2d::new(&mut comm, 4, 4, None, None).unwrap();
        let aa = form_dirichlet_laplacian(&da, 0.0).unwrap();
        let b = da.create_global_vector();
        let mut u = da.create_global_vector();
        let ksp = Ksp::new(options(KspType::Cg, PcType::Jacobi)).unwrap();
        assert_eq!(
            ksp.solve(&mut comm, &da, &aa, &b, &mut u).err(),
            Some("zero diagonal entry; cannot use the Jacobi preconditioner")
        );
        assert_eq!(
            ksp.solve(&mut comm, &da, &aa, &Vector::new(3), &mut u).err(),
            Some("b vector has the wrong dimension")
        );
        assert_eq!(
            ksp.solve(&mut comm, &da, &aa, &b, &mut Vector::new(3)).err(),
            Some("x vector has the wrong dimension")
        );
    }

    #[test]
    fn parallel_solves_match_serial_solve() {
        let (mx, my) = (13, 11);
        let mut comm = SerialComm;
        let da = DistributedArray2d::new(&mut comm, mx, my, None, None).unwrap();
        let aa = form_dirichlet_laplacian(&da, 1.0).unwrap();
        let mut b = da.create_global_vector();
        form_rhs(&da, &mut b).unwrap();
        let mut u_serial = da.create_global_vector();
        Ksp::new(options(KspType::Preonly, PcType::Lu))
            .unwrap()
            .solve(&mut comm, &da, &aa, &b, &mut u_serial)
            .unwrap();

        for ksp_type in [KspType::Cg, KspType::Gmres] {
            let comms = ChannelComm::cluster(4);
            thread::scope(|s| {
                for mut comm in comms {
                    let u_serial = &u_serial;
                    s.spawn(move || {
                        let da = DistributedArray2d::new(&mut comm, mx, my, None, None).unwrap();
                        let aa = form_dirichlet_laplacian(&da, 1.0).unwrap();
                        let mut b = da.create_global_vector();
                        form_rhs(&da, &mut b).unwrap();
                        let mut u = da.create_global_vector();
                        let ksp = Ksp::new(options(ksp_type, PcType::Jacobi)).unwrap();
                        let rep = ksp.solve(&mut comm, &da, &aa, &b, &mut u).unwrap();
                        assert!(rep.reason.is_converged());
                        if let Some(natural) = da.gather_natural(&mut comm, &u).unwrap() {
                            vec_approx_eq(&natural, u_serial.as_data(), 1e-8);
                        }
                    });
                }
            });
        }
    }

    #[test]
    fn lu_requires_single_process() {
        let comms = ChannelComm::cluster(2);
        thread::scope(|s| {
            for mut comm in comms {
                s.spawn(move || {
                    let da = DistributedArray2d::new(&mut comm, 5, 5, None, None).unwrap();
                    let aa = form_dirichlet_laplacian(&da, 1.0).unwrap();
                    let b = da.create_global_vector();
                    let mut u = da.create_global_vector();
                    let ksp = Ksp::new(options(KspType::Preonly, PcType::Lu)).unwrap();
                    assert_eq!(
                        ksp.solve(&mut comm, &da, &aa, &b, &mut u).err(),
                        Some("the LU preconditioner requires a single process")
                    );
                });
            }
        });
    }
}
