use crate::{DistributedArray2d, StrError};
use russell_lab::Vector;

// Manufactured solution of
//
//   ∂²u   ∂²u
// - ——— - ——— = f(x, y)     on the (1.0 × 1.0) square
//   ∂x²   ∂y²
//
// with u = 0 on the boundary, where
//
// u(x, y) = x² (1 - x²) y² (y² - 1)
//
// f(x, y) = 2 [(1 - 6x²) y² (1 - y²) + (1 - 6y²) x² (1 - x²)]

/// Returns the exact solution u(x, y)
pub fn exact_solution(x: f64, y: f64) -> f64 {
    let (xx, yy) = (x * x, y * y);
    xx * (1.0 - xx) * yy * (yy - 1.0)
}

/// Returns the source term f(x, y) = -∇²u
pub fn source(x: f64, y: f64) -> f64 {
    let (xx, yy) = (x * x, y * y);
    2.0 * ((1.0 - 6.0 * xx) * yy * (1.0 - yy) + (1.0 - 6.0 * yy) * xx * (1.0 - xx))
}

/// Fills a global vector with the exact solution at the owned points
pub fn form_exact(da: &DistributedArray2d, uexact: &mut Vector) -> Result<(), StrError> {
    let info = da.local_info();
    if uexact.dim() != info.xm * info.ym {
        return Err("uexact vector has the wrong dimension");
    }
    da.loop_over_owned_points(|k, _, _, x, y| {
        uexact[k] = exact_solution(x, y);
    });
    Ok(())
}

/// Fills a global vector with the right-hand side of the scaled system
///
/// Interior points get `hx hy f(x, y)` and boundary points get the (zero) boundary value.
pub fn form_rhs(da: &DistributedArray2d, b: &mut Vector) -> Result<(), StrError> {
    let info = da.local_info();
    if b.dim() != info.xm * info.ym {
        return Err("b vector has the wrong dimension");
    }
    let (hx, hy) = da.spacing();
    da.loop_over_owned_points(|k, i, j, x, y| {
        b[k] = if da.is_boundary(i, j) { 0.0 } else { hx * hy * source(x, y) };
    });
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::{exact_solution, form_exact, form_rhs, source};
    use crate::{form_dirichlet_laplacian, DistributedArray2d, SerialComm};
    use russell_lab::{approx_eq, Vector};

    #[test]
    fn exact_solution_vanishes_on_boundary() {
        for t in [0.0, 0.25, 0.5, 1.0] {
            assert_eq!(exact_solution(0.0, t), 0.0);
            assert_eq!(exact_solution(1.0, t), 0.0);
            assert_eq!(exact_solution(t, 0.0), 0.0);
            assert_eq!(exact_solution(t, 1.0), 0.0);
        }
        approx_eq(exact_solution(0.5, 0.5), -0.03515625, 1e-15);
    }

    #[test]
    fn source_matches_finite_differences_of_exact_solution() {
        let h = 1e-3;
        for (x, y) in [(0.3, 0.6), (0.5, 0.5), (0.8, 0.1)] {
            let lap = (exact_solution(x + h, y) - 2.0 * exact_solution(x, y) + exact_solution(x - h, y)) / (h * h)
                + (exact_solution(x, y + h) - 2.0 * exact_solution(x, y) + exact_solution(x, y - h)) / (h * h);
            approx_eq(source(x, y), -lap, 1e-5);
        }
    }

    #[test]
    fn form_functions_work() {
        let mut comm = SerialComm;
        let da = DistributedArray2d::new(&mut comm, 3, 3, None, None).unwrap();
        let mut u = da.create_global_vector();
        let mut b = da.create_global_vector();
        form_exact(&da, &mut u).unwrap();
        form_rhs(&da, &mut b).unwrap();
        for k in 0..9 {
            if k == 4 {
                approx_eq(u[k], exact_solution(0.5, 0.5), 1e-15);
                approx_eq(b[k], 0.25 * source(0.5, 0.5), 1e-15);
            } else {
                assert_eq!(u[k], 0.0);
                assert_eq!(b[k], 0.0);
            }
        }
        let mut wrong = Vector::new(1);
        assert_eq!(form_exact(&da, &mut wrong).err(), Some("uexact vector has the wrong dimension"));
        assert_eq!(form_rhs(&da, &mut wrong).err(), Some("b vector has the wrong dimension"));
    }

    #[test]
    fn residual_of_exact_solution_is_small() {
        // the truncation error of the five-point stencil is O(h²)
        let mut comm = SerialComm;
        let da = DistributedArray2d::new(&mut comm, 33, 33, None, None).unwrap();
        let aa = form_dirichlet_laplacian(&da, 1.0).unwrap();
        let mut u = da.create_global_vector();
        let mut b = da.create_global_vector();
        let mut au = da.create_global_vector();
        form_exact(&da, &mut u).unwrap();
        form_rhs(&da, &mut b).unwrap();
        aa.mat_vec(&mut comm, &da, &mut au, &u).unwrap();
        let (hx, hy) = da.spacing();
        for k in 0..au.dim() {
            assert!(f64::abs(au[k] - b[k]) / (hx * hy) < 0.1);
        }
    }
}
