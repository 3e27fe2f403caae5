/// Defines a type alias for the error type as a static string
pub type StrError = &'static str;

mod channel;
mod comm;
mod dirichlet_laplacian;
mod distributed_array;
mod krylov;
mod options;
mod plot;
mod poisson;
mod problem;
mod stages;
pub mod vector;
pub use crate::channel::*;
pub use crate::comm::*;
pub use crate::dirichlet_laplacian::*;
pub use crate::distributed_array::*;
pub use crate::krylov::*;
pub use crate::options::*;
pub use crate::plot::*;
pub use crate::poisson::*;
pub use crate::problem::*;
pub use crate::stages::*;
