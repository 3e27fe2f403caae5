use crate::{Messenger, StrError};
use russell_lab::{vec_inner, vec_update, Vector};

/// Returns the inner product u ⋅ v over all processes
pub fn dot<C: Messenger>(comm: &mut C, u: &Vector, v: &Vector) -> Result<f64, StrError> {
    if u.dim() != v.dim() {
        return Err("vectors must have the same dimension");
    }
    let mut sum = [vec_inner(u, v)];
    comm.allreduce_sum(&mut sum)?;
    Ok(sum[0])
}

/// Returns the Euclidean norm ‖v‖₂ over all processes
pub fn norm2<C: Messenger>(comm: &mut C, v: &Vector) -> Result<f64, StrError> {
    Ok(f64::sqrt(dot(comm, v, v)?))
}

/// Returns the max norm ‖v‖∞ over all processes
pub fn norm_inf<C: Messenger>(comm: &mut C, v: &Vector) -> Result<f64, StrError> {
    let mut max = [v.as_data().iter().fold(0.0, |acc: f64, x| acc.max(x.abs()))];
    comm.allreduce_max(&mut max)?;
    Ok(max[0])
}

/// Performs y := y + alpha ⋅ x on the owned entries
pub fn axpy(y: &mut Vector, alpha: f64, x: &Vector) -> Result<(), StrError> {
    vec_update(y, alpha, x)
}

/// Performs z := x ⊙ y (pointwise product) on the owned entries
pub fn pointwise_mult(z: &mut Vector, x: &Vector, y: &Vector) -> Result<(), StrError> {
    if z.dim() != x.dim() || z.dim() != y.dim() {
        return Err("vectors must have the same dimension");
    }
    for k in 0..z.dim() {
        z[k] = x[k] * y[k];
    }
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
