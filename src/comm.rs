use crate::StrError;
use msgpass::{Communicator, MpiOpReal};

/// Defines the message passing operations needed by the distributed array and the solvers
///
/// All methods take `&mut self` because the MPI communicator does.
pub trait Messenger {
    /// Returns the rank of this process
    fn rank(&mut self) -> Result<usize, StrError>;

    /// Returns the number of processes
    fn size(&mut self) -> Result<usize, StrError>;

    /// Blocks until all processes reach this call
    fn barrier(&mut self) -> Result<(), StrError>;

    /// Replaces each entry by the sum over all processes
    fn allreduce_sum(&mut self, values: &mut [f64]) -> Result<(), StrError>;

    /// Replaces each entry by the maximum over all processes
    fn allreduce_max(&mut self, values: &mut [f64]) -> Result<(), StrError>;

    /// Sends an array to another process
    fn send(&mut self, data: &[f64], to: usize, tag: i32) -> Result<(), StrError>;

    /// Receives an array from another process
    ///
    /// The length of `data` must match the length of the message.
    fn receive(&mut self, data: &mut [f64], from: usize, tag: i32) -> Result<(), StrError>;
}

/// Implements a messenger for a single process (no MPI)
pub struct SerialComm;

impl Messenger for SerialComm {
    fn rank(&mut self) -> Result<usize, StrError> {
        Ok(0)
    }

    fn size(&mut self) -> Result<usize, StrError> {
        Ok(1)
    }

    fn barrier(&mut self) -> Result<(), StrError> {
        Ok(())
    }

    fn allreduce_sum(&mut self, _values: &mut [f64]) -> Result<(), StrError> {
        Ok(())
    }

    fn allreduce_max(&mut self, _values: &mut [f64]) -> Result<(), StrError> {
        Ok(())
    }

    fn send(&mut self, _data: &[f64], _to: usize, _tag: i32) -> Result<(), StrError> {
        Err("a serial communicator cannot send messages")
    }

    fn receive(&mut self, _data: &mut [f64], _from: usize, _tag: i32) -> Result<(), StrError> {
        Err("a serial communicator cannot receive messages")
    }
}

impl Messenger for Communicator {
    fn rank(&mut self) -> Result<usize, StrError> {
        Communicator::rank(self)
    }

    fn size(&mut self) -> Result<usize, StrError> {
        Communicator::size(self)
    }

    fn barrier(&mut self) -> Result<(), StrError> {
        Communicator::barrier(self)
    }

    fn allreduce_sum(&mut self, values: &mut [f64]) -> Result<(), StrError> {
        let orig = values.to_vec();
        self.allreduce_f64(values, &orig, MpiOpReal::Sum)
    }

    fn allreduce_max(&mut self, values: &mut [f64]) -> Result<(), StrError> {
        let orig = values.to_vec();
        self.allreduce_f64(values, &orig, MpiOpReal::Max)
    }

    fn send(&mut self, data: &[f64], to: usize, tag: i32) -> Result<(), StrError> {
        self.send_f64(data, to, tag)
    }

    fn receive(&mut self, data: &mut [f64], from: usize, tag: i32) -> Result<(), StrError> {
        self.receive_f64(data, from as i32, tag)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
