use super::{Instruction, InstructionChannel, Opcode};
use crate::error::ChannelError;

/// Forwards to `inner` and keeps a log of every instruction issued.
#[derive(Debug, Default)]
pub struct RecordingChannel<C> {
    inner: C,
    log: Vec<Instruction>,
}

impl<C: InstructionChannel> RecordingChannel<C> {
    pub fn new(inner: C) -> Self { Self { inner, log: Vec::new() } }

    pub fn instructions(&self) -> &[Instruction] { &self.log }

    pub fn count(&self, op: Opcode) -> usize { self.log.iter().filter(|i| i.op == op).count() }

    pub fn inner(&self) -> &C { &self.inner }

    pub fn clear(&mut self) { self.log.clear(); }

    pub fn into_parts(self) -> (C, Vec<Instruction>) { (self.inner, self.log) }
}

impl<C: InstructionChannel> InstructionChannel for RecordingChannel<C> {
    fn execute(&mut self, op: Opcode, in0: u32, in1: u32) -> Result<u32, ChannelError> {
        // record even rejected instructions, they are part of the trace
        self.log.push(Instruction::new(op, in0, in1));
        self.inner.execute(op, in0, in1)
    }
}
