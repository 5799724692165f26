//! Address-to-symbol resolution for disassembly and trace output.
//!
//! Symbols come from loaded object images as `(name, address, size)`
//! triples. Lookup finds the nearest covering symbol. Address zero is
//! never symbolicated: the reset vector area would otherwise label every
//! stray zero value.

/// One symbol from a loaded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub image: String,
    pub name: String,
    pub addr: u32,
    pub size: u32,
}

/// A successful lookup: symbol name, its base, and the offset of the
/// queried address within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved<'a> {
    pub name: &'a str,
    pub base: u32,
    pub offset: u32,
}

/// Insertion-ordered symbol store with sorted lookup index.
#[derive(Debug, Default)]
pub struct SymbolTable {
    syms: Vec<Symbol>,
    /// Indices into `syms`, sorted by address (stable, so insertion order
    /// breaks ties).
    order: Vec<usize>,
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the symbols of one image. A declared size of zero is treated
    /// as one byte.
    pub fn add_image<I>(&mut self, image: &str, symbols: I)
    where
        I: IntoIterator<Item = (String, u32, u32)>,
    {
        for (name, addr, size) in symbols {
            self.syms.push(Symbol {
                image: image.to_owned(),
                name,
                addr,
                size: size.max(1),
            });
        }
        self.order = (0..self.syms.len()).collect();
        self.order.sort_by_key(|&i| self.syms[i].addr);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.syms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.syms.is_empty()
    }

    /// Resolve `addr` to the covering symbol with the largest base.
    ///
    /// Returns `None` for `addr == 0`, for symbols based at zero, and
    /// when no symbol covers the address.
    #[must_use]
    pub fn resolve(&self, addr: u32) -> Option<Resolved<'_>> {
        if addr == 0 {
            return None;
        }
        let mut i = self
            .order
            .partition_point(|&ix| self.syms[ix].addr <= addr);
        while i > 0 {
            i -= 1;
            let sym = &self.syms[self.order[i]];
            if sym.addr == 0 {
                continue;
            }
            let end = u64::from(sym.addr) + u64::from(sym.size);
            if u64::from(addr) < end {
                return Some(Resolved {
                    name: &sym.name,
                    base: sym.addr,
                    offset: addr - sym.addr,
                });
            }
        }
        None
    }
}
