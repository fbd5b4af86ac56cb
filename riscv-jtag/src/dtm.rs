//! Debug Transport Module (DTM) handling
//!
//! The DTM is the JTAG side of the RISC-V debug transport. Its registers are selected through the
//! instruction register and accessed with DR scans; `dmi` carries the transactions of the Debug
//! Module Interface.

use crate::bits::{BitSequence, BitsError};
use crate::fields::{BitField, DecodeMode, FieldEnum, FieldError, FieldMap, FieldSpec};
use crate::jtag::{JtagAccess, JtagError};

/// Address of the `idcode` JTAG register.
pub const IDCODE_ADDRESS: u32 = 0x01;

/// Address of the `dtmcs` JTAG register.
pub const DTMCS_ADDRESS: u32 = 0x10;

/// Address of the `dmi` JTAG register.
pub const DMI_ADDRESS: u32 = 0x11;

/// Address of the `bypass` JTAG register.
pub const BYPASS_ADDRESS: u32 = 0x1f;

/// Width of the `dtmcs` JTAG register.
const DTMCS_WIDTH: usize = 32;

/// Offset of the `address` field in the `dmi` JTAG register.
const DMI_ADDRESS_BIT_OFFSET: u32 = 34;

/// Offset of the `value` field in the `dmi` JTAG register.
const DMI_VALUE_BIT_OFFSET: u32 = 2;

const DMI_OP_MASK: u128 = 0x3;

const DMISTAT: FieldEnum = FieldEnum {
    name: "dmistat",
    members: &[("ok", 0), ("reserved", 1), ("failed", 2), ("busy", 3)],
};

const DTM_VERSION: FieldEnum = FieldEnum {
    name: "version",
    members: &[("0.11", 0), ("0.13", 1)],
};

/// Layout of the `dtmcs` register.
pub static DTMCS: BitField = BitField::new(&[
    FieldSpec::flag("dmihardreset", 17),
    FieldSpec::flag("dmireset", 16),
    FieldSpec::new("idle", 12, 3),
    FieldSpec::new("dmistat", 10, 2).enumerated(&DMISTAT),
    FieldSpec::new("abits", 4, 6),
    FieldSpec::new("version", 0, 4).enumerated(&DTM_VERSION),
]);

/// Errors raised by the DTM layer.
#[derive(thiserror::Error, Debug)]
pub enum DtmError {
    #[error("JTAG access failed")]
    Jtag(#[from] JtagError),
    #[error(transparent)]
    Bits(#[from] BitsError),
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error(transparent)]
    Dmi(#[from] DmiError),
    #[error("no DTM responded, dtmcs reads as zero")]
    NoTarget,
    #[error("the DTM reports abits = 0, the debug module is not initialized")]
    NotInitialized,
    #[error("unsupported debug transport module version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown DTM register {0:?}")]
    UnknownRegister(String),
    #[error("DMI address {address:#x} does not fit into {abits} address bits")]
    AddressTooWide { address: u32, abits: u32 },
}

/// A failed DMI transaction, as latched by the DTM.
///
/// Once latched, every DMI access fails with the same value until [`Dtm::dmireset`] or
/// [`Dtm::dmihardreset`] is called.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmiError {
    #[error("DMI operation failed")]
    Failed,
    #[error("DMI operation still in progress")]
    Busy,
}

/// Possible return values in the op field of the `dmi` register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmiOperationStatus {
    Ok = 0,
    Reserved = 1,
    OperationFailed = 2,
    RequestInProgress = 3,
}

impl DmiOperationStatus {
    pub(crate) fn parse(value: u8) -> Option<Self> {
        let status = match value {
            0 => Self::Ok,
            1 => Self::Reserved,
            2 => Self::OperationFailed,
            3 => Self::RequestInProgress,
            _ => return None,
        };

        Some(status)
    }

    /// Reserved is reported as a failure.
    pub fn map_as_err(self) -> Result<(), DmiError> {
        match self {
            Self::Ok => Ok(()),
            Self::Reserved | Self::OperationFailed => Err(DmiError::Failed),
            Self::RequestInProgress => Err(DmiError::Busy),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DmiOperation {
    NoOp,
    Read { address: u32 },
    Write { address: u32, value: u32 },
}

impl DmiOperation {
    fn opcode(&self) -> u8 {
        match self {
            Self::NoOp => 0,
            Self::Read { .. } => 1,
            Self::Write { .. } => 2,
        }
    }

    fn address(&self) -> u32 {
        match self {
            Self::NoOp => 0,
            Self::Read { address } | Self::Write { address, .. } => *address,
        }
    }

    /// The scan word: `(address << 34) | (value << 2) | op`.
    pub fn register_value(&self) -> u128 {
        let value = match self {
            Self::Write { value, .. } => *value,
            _ => 0,
        };
        (u128::from(self.address()) << DMI_ADDRESS_BIT_OFFSET)
            | (u128::from(value) << DMI_VALUE_BIT_OFFSET)
            | u128::from(self.opcode())
    }
}

/// Width of a DTM register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtmRegisterWidth {
    Fixed(usize),
    /// `abits + 34`, known after discovery.
    Dmi,
}

/// An entry of the DTM register table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtmRegister {
    pub name: &'static str,
    pub address: u32,
    pub width: DtmRegisterWidth,
}

const REGISTERS: &[DtmRegister] = &[
    DtmRegister {
        name: "idcode",
        address: IDCODE_ADDRESS,
        width: DtmRegisterWidth::Fixed(32),
    },
    DtmRegister {
        name: "dtmcs",
        address: DTMCS_ADDRESS,
        width: DtmRegisterWidth::Fixed(DTMCS_WIDTH),
    },
    DtmRegister {
        name: "dmi",
        address: DMI_ADDRESS,
        width: DtmRegisterWidth::Dmi,
    },
    DtmRegister {
        name: "bypass",
        address: BYPASS_ADDRESS,
        width: DtmRegisterWidth::Fixed(1),
    },
];

/// Register level access to the Debug Module.
///
/// Implemented by [`Dtm`], and by test doubles of the Debug Module.
pub trait DmiAccess {
    /// Reads a Debug Module register.
    fn dmi_read(&mut self, address: u32) -> Result<u32, DtmError>;

    /// Writes a Debug Module register.
    fn dmi_write(&mut self, address: u32, value: u32) -> Result<(), DtmError>;
}

/// Access to the Debug Transport Module (DTM),
/// which is used to communicate with the RISC-V debug module.
#[derive(Debug)]
pub struct Dtm<J> {
    jtag: J,
    ir_width: usize,
    /// Number of address bits in the DMI register, discovered on first use.
    abits: Option<u32>,
    idle_cycles: usize,
    idle_override: Option<usize>,
    decode_mode: DecodeMode,
    /// IR value currently selected on the TAP.
    selected: Option<u32>,
    sticky: Option<DmiError>,
}

impl<J: JtagAccess> Dtm<J> {
    pub fn new(jtag: J, ir_width: usize) -> Self {
        Self {
            jtag,
            ir_width,
            abits: None,
            idle_cycles: 0,
            idle_override: None,
            decode_mode: DecodeMode::default(),
            selected: None,
            sticky: None,
        }
    }

    /// Run-Test/Idle cycles after each DMI scan, overriding the `dtmcs.idle` hint.
    pub fn with_idle_cycles(mut self, idle_cycles: Option<usize>) -> Self {
        self.idle_override = idle_cycles;
        self
    }

    pub fn with_decode_mode(mut self, mode: DecodeMode) -> Self {
        self.decode_mode = mode;
        self
    }

    pub fn jtag(&self) -> &J {
        &self.jtag
    }

    pub fn jtag_mut(&mut self) -> &mut J {
        &mut self.jtag
    }

    /// The latched DMI error, if any.
    pub fn sticky_error(&self) -> Option<DmiError> {
        self.sticky
    }

    /// Looks up a register by name.
    pub fn register(&self, name: &str) -> Result<&'static DtmRegister, DtmError> {
        REGISTERS
            .iter()
            .find(|register| register.name == name)
            .ok_or_else(|| DtmError::UnknownRegister(name.to_string()))
    }

    fn register_width(&mut self, register: &DtmRegister) -> Result<usize, DtmError> {
        match register.width {
            DtmRegisterWidth::Fixed(width) => Ok(width),
            DtmRegisterWidth::Dmi => Ok((self.abits()? + DMI_ADDRESS_BIT_OFFSET) as usize),
        }
    }

    /// Reads the register called `name`.
    ///
    /// Reading `dmi` scans a nop and is subject to the DMI error latch.
    pub fn get_register(&mut self, name: &str) -> Result<u128, DtmError> {
        self.set_register(name, 0)
    }

    /// Writes the register called `name` and returns its previous content.
    ///
    /// Scans of `dmi` are subject to the DMI error latch and latch the status they return.
    pub fn set_register(&mut self, name: &str, value: u128) -> Result<u128, DtmError> {
        let register = self.register(name)?;
        if register.width == DtmRegisterWidth::Dmi {
            return self.dmi_scan(value);
        }

        let width = self.register_width(register)?;
        let bits = BitSequence::from_value(value, width)?;
        Ok(self.write(register.address, &bits)?.value()?)
    }

    fn select(&mut self, address: u32) -> Result<(), DtmError> {
        if self.selected != Some(address) {
            // Forget the selection first, a failed IR scan leaves it undefined.
            self.selected = None;
            let ir = BitSequence::from_value(address.into(), self.ir_width)?;
            self.jtag.write_ir(&ir)?;
            self.selected = Some(address);
        }
        Ok(())
    }

    /// Selects the register at `address` and scans `length` zero bits through it.
    pub fn read(&mut self, address: u32, length: usize) -> Result<BitSequence, DtmError> {
        self.select(address)?;
        Ok(self.jtag.read_dr(length)?)
    }

    /// Selects the register at `address`, scans `bits` into it and returns what was shifted out.
    pub fn write(&mut self, address: u32, bits: &BitSequence) -> Result<BitSequence, DtmError> {
        self.select(address)?;
        Ok(self.jtag.write_dr(bits)?)
    }

    /// Reads a 32 bit register.
    pub fn read_word(&mut self, address: u32) -> Result<u32, DtmError> {
        Ok(self.read(address, 32)?.value()? as u32)
    }

    /// Writes a 32 bit register and returns its previous content.
    pub fn write_word(&mut self, address: u32, value: u32) -> Result<u32, DtmError> {
        let bits = BitSequence::from_value(value.into(), 32)?;
        Ok(self.write(address, &bits)?.value()? as u32)
    }

    pub fn idcode(&mut self) -> Result<u32, DtmError> {
        self.read_word(IDCODE_ADDRESS)
    }

    /// Reads and decodes `dtmcs`.
    pub fn dtmcs(&mut self) -> Result<FieldMap, DtmError> {
        let raw = self.read_word(DTMCS_ADDRESS)?;
        Ok(DTMCS.decode_with(raw.into(), self.decode_mode)?)
    }

    /// Number of DMI address bits, read from `dtmcs` on first use.
    pub fn abits(&mut self) -> Result<u32, DtmError> {
        if let Some(abits) = self.abits {
            return Ok(abits);
        }

        let raw = self.read_word(DTMCS_ADDRESS)?;
        if raw == 0 {
            return Err(DtmError::NoTarget);
        }

        let dtmcs = DTMCS.decode_with(raw.into(), self.decode_mode)?;
        tracing::debug!("dtmcs: {dtmcs}");

        let version = dtmcs.raw("version").unwrap_or_default() as u8;
        if version != 1 {
            return Err(DtmError::UnsupportedVersion(version));
        }

        let abits = dtmcs.raw("abits").unwrap_or_default() as u32;
        if abits == 0 {
            return Err(DtmError::NotInitialized);
        }

        let hint = dtmcs.raw("idle").unwrap_or_default() as usize;
        self.idle_cycles = self.idle_override.unwrap_or(hint);
        self.abits = Some(abits);

        Ok(abits)
    }

    /// Clears the DMI error latch, here and in the DTM.
    pub fn dmireset(&mut self) -> Result<(), DtmError> {
        self.reset_dmi("dmireset")
    }

    /// Clears the DMI error latch and makes the DTM drop any outstanding transaction.
    pub fn dmihardreset(&mut self) -> Result<(), DtmError> {
        self.reset_dmi("dmihardreset")
    }

    fn reset_dmi(&mut self, field: &str) -> Result<(), DtmError> {
        tracing::debug!("{field}, latched error {:?}", self.sticky);

        let value = DTMCS.encode(0, &[(field, true.into())])?;
        self.write_word(DTMCS_ADDRESS, value as u32)?;
        self.sticky = None;
        Ok(())
    }

    /// One scan of the `dmi` register.
    ///
    /// Returns the data field of the response, which belongs to the previous operation.
    fn dmi_register_access(&mut self, op: DmiOperation) -> Result<u32, DtmError> {
        if let Some(error) = self.sticky {
            return Err(error.into());
        }

        let abits = self.abits()?;
        if abits < 32 && op.address() >> abits != 0 {
            return Err(DtmError::AddressTooWide {
                address: op.address(),
                abits,
            });
        }

        let response = self.dmi_scan(op.register_value())?;
        Ok((response >> DMI_VALUE_BIT_OFFSET) as u32)
    }

    /// Scans `request` through `dmi` and returns the raw response.
    ///
    /// Fails without any traffic while an error is latched, and latches a busy or failed status.
    fn dmi_scan(&mut self, request: u128) -> Result<u128, DtmError> {
        if let Some(error) = self.sticky {
            return Err(error.into());
        }

        let width = (self.abits()? + DMI_ADDRESS_BIT_OFFSET) as usize;
        let request_bits = BitSequence::from_value(request, width)?;
        let response = self.write(DMI_ADDRESS, &request_bits)?.value()?;

        if self.idle_cycles > 0 {
            self.jtag.idle(self.idle_cycles)?;
        }

        // We masked out two bits, parse always works on values 0, 1, 2 and 3
        let status = DmiOperationStatus::parse((response & DMI_OP_MASK) as u8)
            .unwrap_or(DmiOperationStatus::Reserved);
        if let Err(error) = status.map_as_err() {
            tracing::warn!("dmi scan {:#x} answered with {status:?}, latching", request);
            self.sticky = Some(error);
            return Err(error.into());
        }

        Ok(response)
    }
}

impl<J: JtagAccess> DmiAccess for Dtm<J> {
    fn dmi_read(&mut self, address: u32) -> Result<u32, DtmError> {
        // Prepare the read by sending a read request with the register address
        self.dmi_register_access(DmiOperation::Read { address })?;

        // Read back the response from the previous request.
        let value = self.dmi_register_access(DmiOperation::NoOp)?;
        tracing::trace!("dmi[{address:#04x}] -> {value:#010x}");
        Ok(value)
    }

    fn dmi_write(&mut self, address: u32, value: u32) -> Result<(), DtmError> {
        tracing::trace!("dmi[{address:#04x}] <- {value:#010x}");
        self.dmi_register_access(DmiOperation::Write { address, value })?;

        // The status of the write is only reported by the next scan.
        self.dmi_register_access(DmiOperation::NoOp)?;
        Ok(())
    }
}
