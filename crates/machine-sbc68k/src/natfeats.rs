//! Native features: host services requested through illegal opcodes.
//!
//! Guest code executes opcode 0x7300 (`NATFEAT_ID`) with a pointer to a
//! feature-name C string on the stack and receives the feature id in D0,
//! then 0x7301 (`NATFEAT_CALL`) with the id (and any arguments) on the
//! stack. Arguments are read with non-perturbing peeks, so a bad guest
//! pointer cannot fault inside the hook. An unknown feature name answers
//! id 0; an unknown call id falls through to the guest's
//! illegal-instruction vector.

use std::io::Write;

use emu_core::{IllegalHook, Reg, RegAccess, StopReason, System};

pub const NATFEAT_ID: u16 = 0x7300;
pub const NATFEAT_CALL: u16 = 0x7301;

/// Interface version reported by `NF_VERSION`.
pub const NATFEAT_VERSION: u32 = 0x0001_0000;

const NF_VERSION_ID: u32 = 1;
const NF_STDERR_ID: u32 = 2;
const NF_SHUTDOWN_ID: u32 = 3;

/// Longest guest string the stderr feature will copy per call.
const MAX_STRING: usize = 4096;

/// The native-features dispatcher, installed as the system's
/// illegal-instruction hook.
pub struct NatFeats {
    out: Box<dyn Write>,
}

impl NatFeats {
    /// Dispatcher writing `NF_STDERR` output to host stderr.
    #[must_use]
    pub fn new() -> Self {
        Self {
            out: Box::new(std::io::stderr()),
        }
    }

    /// Dispatcher with a custom output sink.
    #[must_use]
    pub fn with_output(out: Box<dyn Write>) -> Self {
        Self { out }
    }

    fn feature_id(name: &str) -> u32 {
        match name {
            "NF_VERSION" => NF_VERSION_ID,
            "NF_STDERR" => NF_STDERR_ID,
            "NF_SHUTDOWN" => NF_SHUTDOWN_ID,
            _ => 0,
        }
    }
}

impl Default for NatFeats {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a zero-terminated guest string via peeks. `None` when the
/// pointer is null or runs off mapped memory before the terminator.
fn read_cstring(sys: &System, ptr: u32) -> Option<Vec<u8>> {
    if ptr == 0 {
        return None;
    }
    let mut bytes = Vec::new();
    for i in 0..MAX_STRING as u32 {
        match sys.peek8(ptr.wrapping_add(i))? {
            0 => return Some(bytes),
            byte => bytes.push(byte),
        }
    }
    Some(bytes)
}

impl IllegalHook for NatFeats {
    fn handle(&mut self, sys: &mut System, regs: &mut dyn RegAccess) -> bool {
        let pc = regs.get_reg(Reg::Pc);
        let opcode = sys.read_disasm_16(pc) as u16;
        let sp = regs.get_reg(Reg::Sp);
        match opcode {
            NATFEAT_ID => {
                let ptr = sys.read_disasm_32(sp.wrapping_add(4));
                let id = read_cstring(sys, ptr)
                    .and_then(|bytes| String::from_utf8(bytes).ok())
                    .map_or(0, |name| Self::feature_id(&name));
                regs.set_reg(Reg::D(0), id);
                regs.set_reg(Reg::Pc, pc.wrapping_add(2));
                true
            }
            NATFEAT_CALL => {
                let id = sys.read_disasm_32(sp.wrapping_add(4));
                match id {
                    NF_VERSION_ID => regs.set_reg(Reg::D(0), NATFEAT_VERSION),
                    NF_STDERR_ID => {
                        let ptr = sys.read_disasm_32(sp.wrapping_add(8));
                        let text = read_cstring(sys, ptr).unwrap_or_default();
                        let written = match self
                            .out
                            .write_all(&text)
                            .and_then(|()| self.out.flush())
                        {
                            Ok(()) => text.len() as u32,
                            Err(err) => {
                                log::warn!(target: "natfeats", "stderr sink: {err}");
                                0
                            }
                        };
                        regs.set_reg(Reg::D(0), written);
                    }
                    NF_SHUTDOWN_ID => {
                        sys.request_stop(StopReason::ShutdownRequested);
                        regs.set_reg(Reg::D(0), 0);
                    }
                    _ => return false,
                }
                regs.set_reg(Reg::Pc, pc.wrapping_add(2));
                true
            }
            _ => false,
        }
    }
}
