//! Human-readable rendering of bus trace records.
//!
//! Instruction records are symbolicated; map/unmap/move records always
//! render raw addresses.

use emu_core::{SymbolTable, TraceKind, TraceRecord};

/// Format one record. Invalid accesses carry a `!` after the op code.
#[must_use]
pub fn format_record(record: &TraceRecord, symbols: &SymbolTable) -> String {
    let TraceRecord {
        kind,
        addr,
        width,
        value,
    } = *record;
    match kind {
        TraceKind::MemMap => format!("M {addr:08X} class={value}"),
        TraceKind::MemUnmap => format!("U {addr:08X}"),
        TraceKind::MemMove => format!("o {addr:08X} -> {value:08X}"),
        TraceKind::Instr => match symbols.resolve(addr) {
            Some(hit) if hit.offset == 0 => format!("I {addr:08X} {}", hit.name),
            Some(hit) => format!("I {addr:08X} {}+{:#x}", hit.name, hit.offset),
            None => format!("I {addr:08X}"),
        },
        _ => {
            let bang = if kind.is_invalid() { "!" } else { " " };
            format!("{}{bang} {addr:08X} /{width} = {value:08X}", kind.code())
        }
    }
}
