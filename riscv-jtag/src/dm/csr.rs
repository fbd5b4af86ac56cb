//! Register numbers for abstract register access.
//!
//! CSRs use their CSR address as register number, integer GPRs live at `0x1000 + n`.

use std::fmt;

/// First abstract register number of the integer GPRs.
pub const GPR_BASE: u16 = 0x1000;

pub const DCSR: u16 = 0x7b0;
pub const DPC: u16 = 0x7b1;
pub const TSELECT: u16 = 0x7a0;
pub const TDATA1: u16 = 0x7a1;
pub const TDATA2: u16 = 0x7a2;

const CSRS: &[(&str, u16)] = &[
    // User
    ("cycle", 0xc00),
    ("time", 0xc01),
    ("instret", 0xc02),
    ("cycleh", 0xc80),
    ("timeh", 0xc81),
    ("instreth", 0xc82),
    // Supervisor
    ("sstatus", 0x100),
    ("sie", 0x104),
    ("stvec", 0x105),
    ("scounteren", 0x106),
    ("sscratch", 0x140),
    ("sepc", 0x141),
    ("scause", 0x142),
    ("stval", 0x143),
    ("sip", 0x144),
    ("satp", 0x180),
    // Machine
    ("mvendorid", 0xf11),
    ("marchid", 0xf12),
    ("mimpid", 0xf13),
    ("mhartid", 0xf14),
    ("mstatus", 0x300),
    ("misa", 0x301),
    ("medeleg", 0x302),
    ("mideleg", 0x303),
    ("mie", 0x304),
    ("mtvec", 0x305),
    ("mcounteren", 0x306),
    ("mstatush", 0x310),
    ("mscratch", 0x340),
    ("mepc", 0x341),
    ("mcause", 0x342),
    ("mtval", 0x343),
    ("mip", 0x344),
    ("pmpcfg0", 0x3a0),
    ("pmpcfg1", 0x3a1),
    ("pmpcfg2", 0x3a2),
    ("pmpcfg3", 0x3a3),
    ("pmpaddr0", 0x3b0),
    ("pmpaddr1", 0x3b1),
    ("pmpaddr2", 0x3b2),
    ("pmpaddr3", 0x3b3),
    ("mcycle", 0xb00),
    ("minstret", 0xb02),
    ("mcycleh", 0xb80),
    ("minstreth", 0xb82),
    // Trigger
    ("tselect", TSELECT),
    ("tdata1", TDATA1),
    ("tdata2", TDATA2),
    ("tdata3", 0x7a3),
    ("tinfo", 0x7a4),
    ("tcontrol", 0x7a5),
    // Debug
    ("dcsr", DCSR),
    ("dpc", DPC),
    ("dscratch0", 0x7b2),
    ("dscratch1", 0x7b3),
];

const ABI_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

/// Resolves a CSR name to its address.
pub fn csr_number(name: &str) -> Option<u16> {
    CSRS.iter()
        .find(|(csr, _)| *csr == name)
        .map(|(_, number)| *number)
}

/// Resolves `x0`..`x31`, an ABI name or `fp` to its abstract register number.
pub fn gpr_number(name: &str) -> Option<u16> {
    let index = match name.strip_prefix('x') {
        Some(digits) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
            digits.parse::<u16>().ok().filter(|index| *index < 32)?
        }
        _ if name == "fp" => 8,
        _ => ABI_NAMES.iter().position(|abi| *abi == name)? as u16,
    };
    Some(GPR_BASE + index)
}

/// Resolves any register name to its abstract register number, CSRs first.
pub fn register_number(name: &str) -> Option<u16> {
    csr_number(name).or_else(|| gpr_number(name))
}

/// A register named either by name or by abstract register number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterRef<'a> {
    Name(&'a str),
    Number(u16),
}

impl RegisterRef<'_> {
    pub fn number(&self) -> Option<u16> {
        match self {
            RegisterRef::Name(name) => register_number(name),
            RegisterRef::Number(number) => Some(*number),
        }
    }
}

impl fmt::Display for RegisterRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterRef::Name(name) => f.write_str(name),
            RegisterRef::Number(number) => write!(f, "{number:#06x}"),
        }
    }
}

impl<'a> From<&'a str> for RegisterRef<'a> {
    fn from(name: &'a str) -> Self {
        RegisterRef::Name(name)
    }
}

impl From<u16> for RegisterRef<'_> {
    fn from(number: u16) -> Self {
        RegisterRef::Number(number)
    }
}
