//! Tiered register allocation (§4.5).
//!
//! Mirrors the teacher's `Architecture::REGISTER_COUNT`-bounded physical
//! tier in spirit (a fixed small register file, spill to the next tier
//! when it's exhausted) but adds the two tiers Z80 offers that x86-64
//! doesn't need: the shadow bank (`EXX`/`EX AF,AF'`) and a flat memory
//! scratch area addressed by absolute 16-bit offsets rather than via SP.
//!
//! Virtual registers are ranked by `Function::register_pressure` (higher
//! pressure = more live ranges it overlaps) so the registers under the
//! most simultaneous contention get the scarce physical slots first.
//! This does not yet honor instructions with a fixed-register requirement
//! (`DJNZ` needs its counter in B, block moves need BC/DE/HL) — `isel`
//! special-cases those patterns directly rather than asking the allocator
//! for a specific physical register.

use crate::mir::{Function, Register, Width};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Z80Reg {
    A,
    B,
    C,
    D,
    E,
    H,
    L,
}

impl Z80Reg {
    pub fn name(self) -> &'static str {
        match self {
            Z80Reg::A => "A",
            Z80Reg::B => "B",
            Z80Reg::C => "C",
            Z80Reg::D => "D",
            Z80Reg::E => "E",
            Z80Reg::H => "H",
            Z80Reg::L => "L",
        }
    }
}

const PHYSICAL_TIER: [Z80Reg; 7] = [
    Z80Reg::A,
    Z80Reg::B,
    Z80Reg::C,
    Z80Reg::D,
    Z80Reg::E,
    Z80Reg::H,
    Z80Reg::L,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Lives in the named physical register.
    Physical(Z80Reg),
    /// Lives in the named register of the shadow bank, reached through
    /// `EXX`/`EX AF,AF'` around the point of use.
    Shadow(Z80Reg),
    /// Lives at `scratch_base + offset` in the function-local memory tier.
    Memory(u16),
}

#[derive(Debug, Clone, Default)]
pub struct Allocation {
    pub locations: HashMap<Register, Location>,
    /// Bytes of function-local scratch the memory tier needed.
    pub scratch_bytes: u16,
}

impl Allocation {
    pub fn location_of(&self, reg: Register) -> Location {
        self.locations
            .get(&reg)
            .copied()
            .unwrap_or(Location::Memory(0))
    }
}

pub fn allocate(function: &Function) -> Allocation {
    let register_count = function.registers.len();
    let mut order: Vec<u32> = (0..function.registers.len() as u32).collect();
    order.sort_by_key(|&r| {
        let pressure = function
            .register_pressure
            .get(r as usize)
            .copied()
            .unwrap_or(0);
        std::cmp::Reverse(pressure)
    });

    let mut locations = HashMap::with_capacity(register_count);
    let mut next_physical = 0usize;
    let mut next_shadow = 0usize;
    let mut next_offset: u16 = 0;

    for id in order {
        let reg = Register(id);
        let width = function.width_of(reg);
        let size: u16 = match width {
            Width::W8 => 1,
            Width::W16 => 2,
        };

        let location = if next_physical < PHYSICAL_TIER.len() {
            let loc = Location::Physical(PHYSICAL_TIER[next_physical]);
            next_physical += 1;
            loc
        } else if next_shadow < PHYSICAL_TIER.len() {
            let loc = Location::Shadow(PHYSICAL_TIER[next_shadow]);
            next_shadow += 1;
            loc
        } else {
            let loc = Location::Memory(next_offset);
            next_offset += size;
            loc
        };
        locations.insert(reg, location);
    }

    Allocation {
        locations,
        scratch_bytes: next_offset,
    }
}
