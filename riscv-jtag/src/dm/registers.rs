//! Debug Module registers and their layouts.

use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;

use crate::fields::{BitField, FieldEnum, FieldSpec, Overlay};

/// A register on the Debug Module Interface.
#[derive(Debug, PartialEq, Eq)]
pub struct DmRegister {
    pub name: &'static str,
    pub address: u32,
    pub layout: BitField,
}

const WORD: BitField = BitField::new(&[FieldSpec::new("value", 0, 32)]);

macro_rules! data_register {
    ($(#[$meta:meta])* $name:ident, $address:expr, $register_name:expr) => {
        $(#[$meta])*
        pub static $name: DmRegister = DmRegister {
            name: $register_name,
            address: $address,
            layout: WORD,
        };
    };
}

data_register! { DATA0, 0x04, "data0" }
data_register! { DATA1, 0x05, "data1" }
data_register! { SBADDRESS0, 0x39, "sbaddress0" }
data_register! {
    /// Bits 63:32 of the system bus address, present when `sbasize > 32`.
    SBADDRESS1, 0x3a, "sbaddress1"
}
data_register! { SBDATA0, 0x3c, "sbdata0" }
data_register! { SBDATA1, 0x3d, "sbdata1" }

/// `dmcontrol`
pub static DMCONTROL: DmRegister = DmRegister {
    name: "dmcontrol",
    address: 0x10,
    layout: BitField::new(&[
        FieldSpec::flag("haltreq", 31),
        FieldSpec::flag("resumereq", 30),
        FieldSpec::flag("hartreset", 29),
        FieldSpec::flag("ackhavereset", 28),
        FieldSpec::flag("hasel", 26),
        FieldSpec::new("hartsello", 16, 10),
        FieldSpec::new("hartselhi", 6, 10),
        FieldSpec::flag("setresethaltreq", 3),
        FieldSpec::flag("clrresethaltreq", 2),
        FieldSpec::flag("ndmreset", 1),
        FieldSpec::flag("dmactive", 0),
    ]),
};

const DM_VERSION: FieldEnum = FieldEnum {
    name: "version",
    members: &[("none", 0), ("0.11", 1), ("0.13", 2), ("custom", 15)],
};

/// Readonly `dmstatus`
pub static DMSTATUS: DmRegister = DmRegister {
    name: "dmstatus",
    address: 0x11,
    layout: BitField::new(&[
        FieldSpec::flag("impebreak", 22),
        FieldSpec::flag("allhavereset", 19),
        FieldSpec::flag("anyhavereset", 18),
        FieldSpec::flag("allresumeack", 17),
        FieldSpec::flag("anyresumeack", 16),
        FieldSpec::flag("allnonexistent", 15),
        FieldSpec::flag("anynonexistent", 14),
        FieldSpec::flag("allunavail", 13),
        FieldSpec::flag("anyunavail", 12),
        FieldSpec::flag("allrunning", 11),
        FieldSpec::flag("anyrunning", 10),
        FieldSpec::flag("allhalted", 9),
        FieldSpec::flag("anyhalted", 8),
        FieldSpec::flag("authenticated", 7),
        FieldSpec::flag("authbusy", 6),
        FieldSpec::flag("hasresethaltreq", 5),
        FieldSpec::flag("confstrptrvalid", 4),
        FieldSpec::new("version", 0, 4).enumerated(&DM_VERSION),
    ]),
};

/// Readonly `hartinfo`
pub static HARTINFO: DmRegister = DmRegister {
    name: "hartinfo",
    address: 0x12,
    layout: BitField::new(&[
        FieldSpec::new("nscratch", 20, 4),
        FieldSpec::flag("dataaccess", 16),
        FieldSpec::new("datasize", 12, 4),
        FieldSpec::new("dataaddr", 0, 12),
    ]),
};

const CMDERR: FieldEnum = FieldEnum {
    name: "cmderr",
    members: &[
        ("none", 0),
        ("busy", 1),
        ("not_supported", 2),
        ("exception", 3),
        ("halt_resume", 4),
        ("bus", 5),
        ("other", 7),
    ],
};

/// `abstractcs`
pub static ABSTRACTCS: DmRegister = DmRegister {
    name: "abstractcs",
    address: 0x16,
    layout: BitField::new(&[
        FieldSpec::new("progbufsize", 24, 5),
        FieldSpec::flag("busy", 12),
        FieldSpec::new("cmderr", 8, 3).enumerated(&CMDERR),
        FieldSpec::new("datacount", 0, 4),
    ]),
};

const CMDTYPE: FieldEnum = FieldEnum {
    name: "cmdtype",
    members: &[
        ("access_register", 0),
        ("quick_access", 1),
        ("access_memory", 2),
    ],
};

const AARSIZE: FieldEnum = FieldEnum {
    name: "aarsize",
    members: &[("32bit", 2), ("64bit", 3), ("128bit", 4)],
};

const AAMSIZE: FieldEnum = FieldEnum {
    name: "aamsize",
    members: &[
        ("8bit", 0),
        ("16bit", 1),
        ("32bit", 2),
        ("64bit", 3),
        ("128bit", 4),
    ],
};

/// Write-only `command`. The layout of `control` depends on `cmdtype`.
pub static COMMAND: DmRegister = DmRegister {
    name: "command",
    address: 0x17,
    layout: BitField::new(&[
        FieldSpec::new("cmdtype", 24, 8)
            .enumerated(&CMDTYPE)
            .selector(),
        FieldSpec::new("control", 0, 24),
    ])
    .with_overlays(&[
        Overlay {
            name: "access_register",
            selector_value: 0,
            fields: &[
                FieldSpec::new("aarsize", 20, 3).enumerated(&AARSIZE),
                FieldSpec::flag("aarpostincrement", 19),
                FieldSpec::flag("postexec", 18),
                FieldSpec::flag("transfer", 17),
                FieldSpec::flag("write", 16),
                FieldSpec::new("regno", 0, 16),
            ],
        },
        Overlay {
            name: "quick_access",
            selector_value: 1,
            fields: &[],
        },
        Overlay {
            name: "access_memory",
            selector_value: 2,
            fields: &[
                FieldSpec::flag("aamvirtual", 23),
                FieldSpec::new("aamsize", 20, 3).enumerated(&AAMSIZE),
                FieldSpec::flag("aampostincrement", 19),
                FieldSpec::flag("write", 16),
                FieldSpec::new("target_specific", 14, 2),
            ],
        },
    ]),
};

const SBVERSION: FieldEnum = FieldEnum {
    name: "sbversion",
    members: &[("legacy", 0), ("1.0", 1)],
};

const SBACCESS: FieldEnum = FieldEnum {
    name: "sbaccess",
    members: &[
        ("8bit", 0),
        ("16bit", 1),
        ("32bit", 2),
        ("64bit", 3),
        ("128bit", 4),
    ],
};

const SBERROR: FieldEnum = FieldEnum {
    name: "sberror",
    members: &[
        ("none", 0),
        ("timeout", 1),
        ("bad_address", 2),
        ("bad_alignment", 3),
        ("bad_size", 4),
        ("other", 7),
    ],
};

/// `sbcs`, System Bus Access control and status.
pub static SBCS: DmRegister = DmRegister {
    name: "sbcs",
    address: 0x38,
    layout: BitField::new(&[
        FieldSpec::new("sbversion", 29, 3).enumerated(&SBVERSION),
        FieldSpec::flag("sbbusyerror", 22),
        FieldSpec::flag("sbbusy", 21),
        FieldSpec::flag("sbreadonaddr", 20),
        FieldSpec::new("sbaccess", 17, 3).enumerated(&SBACCESS),
        FieldSpec::flag("sbautoincrement", 16),
        FieldSpec::flag("sbreadondata", 15),
        FieldSpec::new("sberror", 12, 3).enumerated(&SBERROR),
        FieldSpec::new("sbasize", 5, 7),
        FieldSpec::flag("sbaccess128", 4),
        FieldSpec::flag("sbaccess64", 3),
        FieldSpec::flag("sbaccess32", 2),
        FieldSpec::flag("sbaccess16", 1),
        FieldSpec::flag("sbaccess8", 0),
    ]),
};

/// The registers that can be looked up by name.
pub static REGISTERS: [&DmRegister; 12] = [
    &DATA0,
    &DATA1,
    &DMCONTROL,
    &DMSTATUS,
    &HARTINFO,
    &ABSTRACTCS,
    &COMMAND,
    &SBCS,
    &SBADDRESS0,
    &SBADDRESS1,
    &SBDATA0,
    &SBDATA1,
];

/// Looks up a Debug Module register by name.
pub fn register(name: &str) -> Option<&'static DmRegister> {
    REGISTERS
        .iter()
        .copied()
        .find(|register| register.name == name)
}

/// Layout of the `dcsr` CSR.
pub static DCSR: BitField = BitField::new(&[
    FieldSpec::new("xdebugver", 28, 4),
    FieldSpec::flag("ebreakm", 15),
    FieldSpec::flag("ebreaks", 13),
    FieldSpec::flag("ebreaku", 12),
    FieldSpec::flag("stepie", 11),
    FieldSpec::flag("stopcount", 10),
    FieldSpec::flag("stoptime", 9),
    FieldSpec::new("cause", 6, 3),
    FieldSpec::flag("mprven", 4),
    FieldSpec::flag("nmip", 3),
    FieldSpec::flag("step", 2),
    FieldSpec::new("prv", 0, 2),
]);

/// Layout of `tdata1` holding an address/data match trigger (`type == 2`) on RV32.
pub static MCONTROL: BitField = BitField::new(&[
    FieldSpec::new("type", 28, 4),
    FieldSpec::flag("dmode", 27),
    FieldSpec::new("maskmax", 21, 6),
    FieldSpec::flag("hit", 20),
    FieldSpec::flag("select", 19),
    FieldSpec::flag("timing", 18),
    FieldSpec::new("sizelo", 16, 2),
    FieldSpec::new("action", 12, 4),
    FieldSpec::flag("chain", 11),
    FieldSpec::new("match", 7, 4),
    FieldSpec::flag("m", 6),
    FieldSpec::flag("s", 4),
    FieldSpec::flag("u", 3),
    FieldSpec::flag("execute", 2),
    FieldSpec::flag("store", 1),
    FieldSpec::flag("load", 0),
]);

/// `abstractcs.cmderr`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Primitive)]
pub enum AbstractCommandErrorKind {
    None = 0,
    /// An abstract command was issued while another one was still running.
    Busy = 1,
    NotSupported = 2,
    /// An exception occurred while executing the command.
    Exception = 3,
    /// The hart was not in the state the command requires.
    HaltResume = 4,
    Bus = 5,
    Other = 7,
}

impl AbstractCommandErrorKind {
    pub fn parse(value: u64) -> Self {
        Self::from_u64(value).unwrap_or(Self::Other)
    }
}

/// `sbcs.sberror`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Primitive)]
pub enum SystemBusErrorKind {
    None = 0,
    Timeout = 1,
    BadAddress = 2,
    BadAlignment = 3,
    UnsupportedSize = 4,
    Other = 7,
}

impl SystemBusErrorKind {
    pub fn parse(value: u64) -> Self {
        Self::from_u64(value).unwrap_or(Self::Other)
    }
}
