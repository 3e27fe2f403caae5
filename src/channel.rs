use crate::{Messenger, StrError};
use std::sync::mpsc::{channel, Receiver, Sender};

const TAG_REDUCE: i32 = -100;
const TAG_BROADCAST: i32 = -101;
const ROOT: usize = 0;

struct Packet {
    tag: i32,
    data: Vec<f64>,
}

/// Implements a messenger connecting ranks that live in the same process
///
/// Each rank is meant to run on its own thread. There is one channel per ordered
/// pair of ranks, hence messages between two ranks arrive in the order they were sent.
/// Sending never blocks.
pub struct ChannelComm {
    rank: usize,
    size: usize,
    outboxes: Vec<Sender<Packet>>,  // outboxes[to]
    inboxes: Vec<Receiver<Packet>>, // inboxes[from]
}

impl ChannelComm {
    /// Allocates `size` connected communicators; the i-th one has rank i
    pub fn cluster(size: usize) -> Vec<ChannelComm> {
        let mut senders: Vec<Vec<Option<Sender<Packet>>>> = (0..size).map(|_| (0..size).map(|_| None).collect()).collect();
        let mut receivers: Vec<Vec<Option<Receiver<Packet>>>> =
            (0..size).map(|_| (0..size).map(|_| None).collect()).collect();
        for from in 0..size {
            for to in 0..size {
                let (tx, rx) = channel();
                senders[from][to] = Some(tx);
                receivers[to][from] = Some(rx);
            }
        }
        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (outboxes, inboxes))| ChannelComm {
                rank,
                size,
                outboxes: outboxes.into_iter().flatten().collect(),
                inboxes: inboxes.into_iter().flatten().collect(),
            })
            .collect()
    }

    fn allreduce(&mut self, values: &mut [f64], op: fn(f64, f64) -> f64) -> Result<(), StrError> {
        if self.rank == ROOT {
            let mut other = vec![0.0; values.len()];
            for from in 1..self.size {
                self.receive(&mut other, from, TAG_REDUCE)?;
                values.iter_mut().zip(&other).for_each(|(a, b)| *a = op(*a, *b));
            }
            for to in 1..self.size {
                self.send(values, to, TAG_BROADCAST)?;
            }
        } else {
            self.send(values, ROOT, TAG_REDUCE)?;
            self.receive(values, ROOT, TAG_BROADCAST)?;
        }
        Ok(())
    }
}

impl Messenger for ChannelComm {
    fn rank(&mut self) -> Result<usize, StrError> {
        Ok(self.rank)
    }

    fn size(&mut self) -> Result<usize, StrError> {
        Ok(self.size)
    }

    fn barrier(&mut self) -> Result<(), StrError> {
        self.allreduce(&mut [0.0], f64::max)
    }

    fn allreduce_sum(&mut self, values: &mut [f64]) -> Result<(), StrError> {
        self.allreduce(values, |a, b| a + b)
    }

    fn allreduce_max(&mut self, values: &mut [f64]) -> Result<(), StrError> {
        self.allreduce(values, f64::max)
    }

    fn send(&mut self, data: &[f64], to: usize, tag: i32) -> Result<(), StrError> {
        let outbox = self.outboxes.get(to).ok_or("destination rank is out of range")?;
        outbox
            .send(Packet {
                tag,
                data: data.to_vec(),
            })
            .map_err(|_| "destination rank has hung up")
    }

    fn receive(&mut self, data: &mut [f64], from: usize, tag: i32) -> Result<(), StrError> {
        let inbox = self.inboxes.get(from).ok_or("source rank is out of range")?;
        let packet = inbox.recv().map_err(|_| "source rank has hung up")?;
        if packet.tag != tag {
            return Err("received message has an unexpected tag");
        }
        if packet.data.len() != data.len() {
            return Err("received message has an unexpected length");
        }
        data.copy_from_slice(&packet.data);
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
