//! RISC-V Debug Module access
//!
//! Hart run control, abstract register access and System Bus Access on top of any
//! [`DmiAccess`] implementation, following the RISC-V External Debug Support 0.13.

pub mod csr;
pub mod registers;

#[cfg(test)]
pub(crate) mod mock;

use std::fmt;
use std::io::{Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use crate::dtm::{DmiAccess, DtmError};
use crate::fields::{DecodeMode, FieldError, FieldMap, FieldValue};

pub use csr::RegisterRef;
use registers::{
    AbstractCommandErrorKind, DmRegister, SystemBusErrorKind, ABSTRACTCS, COMMAND, DATA0, DCSR,
    DMCONTROL, DMSTATUS, HARTINFO, MCONTROL, SBADDRESS0, SBADDRESS1, SBCS, SBDATA0, SBDATA1,
};

/// Upper bound when probing for trigger units.
const MAX_TRIGGERS: u32 = 32;

/// Highest hart index `hartsello` and `hartselhi` can address.
const MAX_HART: u32 = (1 << 20) - 1;

/// Direction of a register access, for error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read => f.write_str("read"),
            Access::Write => f.write_str("write"),
        }
    }
}

/// Errors raised by the Debug Module.
#[derive(thiserror::Error, Debug)]
pub enum DebugModuleError {
    #[error("DMI access failed")]
    Dtm(#[from] DtmError),
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error("abstract command failed: {0:?}")]
    AbstractCommand(AbstractCommandErrorKind),
    #[error("system bus access failed: {0:?}")]
    SystemBus(SystemBusErrorKind),
    #[error("system bus access was started while the bus was busy")]
    SystemBusBusy,
    #[error("timeout while waiting for {0}")]
    Timeout(&'static str),
    #[error("the debug module did not become active")]
    NotActive,
    #[error("debug module version {0} is not supported")]
    UnsupportedVersion(&'static str),
    #[error("the system bus does not support {0}")]
    Unsupported(&'static str),
    #[error("the hart is not halted")]
    NotHalted,
    #[error("unknown register {0:?}")]
    UnknownRegister(String),
    #[error("address {address:#x} is not aligned to {alignment} bytes")]
    Unaligned { address: u64, alignment: u64 },
    #[error("transfer size {0} is not a multiple of 4 bytes")]
    InvalidSize(usize),
    #[error("address {address:#x} exceeds the {sbasize} bit system bus")]
    AddressTooWide { address: u64, sbasize: u64 },
    #[error("hardware breakpoint unit {0} does not exist")]
    NoSuchBreakpoint(u32),
    #[error("I/O error while streaming memory")]
    Io(#[from] std::io::Error),
    #[error("hart index {0:#x} does not fit into the 20 bit hart selection")]
    InvalidHart(u32),
    #[error("{access} of register {register} failed")]
    RegisterAccess {
        register: String,
        access: Access,
        source: Box<DebugModuleError>,
    },
    #[error("{operation} failed")]
    Operation {
        operation: String,
        source: Box<DebugModuleError>,
    },
}

impl DebugModuleError {
    fn annotate(self, register: RegisterRef<'_>, access: Access) -> Self {
        DebugModuleError::RegisterAccess {
            register: register.to_string(),
            access,
            source: Box::new(self),
        }
    }

    fn within(self, operation: impl fmt::Display) -> Self {
        DebugModuleError::Operation {
            operation: operation.to_string(),
            source: Box::new(self),
        }
    }

    /// The error without any register access or operation annotations.
    pub fn root_cause(&self) -> &DebugModuleError {
        let mut error = self;
        while let DebugModuleError::RegisterAccess { source, .. }
        | DebugModuleError::Operation { source, .. } = error
        {
            error = source;
        }
        error
    }
}

/// Direction and endpoint of [`DebugModule::memory_copy`].
pub enum CopyOp<'a> {
    /// Copy target memory into the writer.
    Read(&'a mut dyn Write),
    /// Copy the reader into target memory.
    Write(&'a mut dyn Read),
}

/// The RISC-V Debug Module, reached through `D`.
#[derive(Debug)]
pub struct DebugModule<D> {
    dmi: D,
    hart: u32,
    poll_timeout: Duration,
    poll_interval: Duration,
    decode_mode: DecodeMode,
    /// `sbcs.sbasize`, set once the system bus capabilities were checked.
    sbasize: Option<u64>,
}

impl<D: DmiAccess> DebugModule<D> {
    pub fn new(dmi: D) -> Self {
        Self {
            dmi,
            hart: 0,
            poll_timeout: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(1),
            decode_mode: DecodeMode::default(),
            sbasize: None,
        }
    }

    /// Sets the deadline and the step of every polling loop.
    pub fn with_polling(mut self, timeout: Duration, interval: Duration) -> Self {
        self.poll_timeout = timeout;
        self.poll_interval = interval;
        self
    }

    pub fn with_decode_mode(mut self, mode: DecodeMode) -> Self {
        self.decode_mode = mode;
        self
    }

    pub fn dmi(&self) -> &D {
        &self.dmi
    }

    pub fn dmi_mut(&mut self) -> &mut D {
        &mut self.dmi
    }

    /// The currently selected hart.
    pub fn hart(&self) -> u32 {
        self.hart
    }

    fn read_fields(&mut self, register: &DmRegister) -> Result<FieldMap, DebugModuleError> {
        let raw = self.dmi.dmi_read(register.address)?;
        Ok(register.layout.decode_with(raw.into(), self.decode_mode)?)
    }

    fn write_fields(
        &mut self,
        register: &DmRegister,
        fields: &[(&str, FieldValue)],
    ) -> Result<(), DebugModuleError> {
        let value = register.layout.encode(0, fields)?;
        tracing::debug!("{} <- {value:#010x}", register.name);
        self.dmi.dmi_write(register.address, value as u32)?;
        Ok(())
    }

    /// Reads `register` until `done` holds, giving up after the polling deadline.
    fn poll(
        &mut self,
        register: &DmRegister,
        what: &'static str,
        done: impl Fn(&FieldMap) -> bool,
    ) -> Result<FieldMap, DebugModuleError> {
        let start = Instant::now();

        loop {
            let fields = self.read_fields(register)?;
            if done(&fields) {
                return Ok(fields);
            }

            if start.elapsed() > self.poll_timeout {
                tracing::warn!("timeout waiting for {what}, last {}: {fields}", register.name);
                return Err(DebugModuleError::Timeout(what));
            }

            thread::sleep(self.poll_interval);
        }
    }

    /// `dmcontrol` fields selecting `hart`, with `dmactive` set.
    fn control(hart: u32) -> Result<[(&'static str, FieldValue); 3], DebugModuleError> {
        if hart > MAX_HART {
            return Err(DebugModuleError::InvalidHart(hart));
        }

        Ok([
            ("dmactive", true.into()),
            ("hartsello", (hart & 0x3ff).into()),
            ("hartselhi", (hart >> 10).into()),
        ])
    }

    /// Activates the Debug Module and selects hart 0.
    #[tracing::instrument(skip(self))]
    pub fn initialize(&mut self) -> Result<(), DebugModuleError> {
        self.write_fields(&DMCONTROL, &[("dmactive", true.into())])?;

        // Select all harts first, then hart 0 alone, so the selection does not depend on what
        // was left behind by a previous session.
        self.write_fields(&DMCONTROL, &[("dmactive", true.into()), ("hasel", true.into())])?;
        self.write_fields(&DMCONTROL, &Self::control(0)?)?;
        self.hart = 0;

        let dmcontrol = self.read_fields(&DMCONTROL)?;
        if !dmcontrol.flag("dmactive") {
            return Err(DebugModuleError::NotActive);
        }

        let dmstatus = self.read_fields(&DMSTATUS)?;
        match dmstatus.get("version") {
            Some(FieldValue::Enum("0.13")) => {}
            Some(FieldValue::Enum("0.11")) => {
                return Err(DebugModuleError::UnsupportedVersion("0.11"));
            }
            other => tracing::warn!("unexpected debug module version {other:?}, continuing"),
        }

        tracing::debug!("dmstatus: {dmstatus}");
        Ok(())
    }

    /// Halts `hart` and waits until it reports halted.
    #[tracing::instrument(skip(self))]
    pub fn halt(&mut self, hart: u32) -> Result<(), DebugModuleError> {
        self.halt_hart(hart)
            .map_err(|error| error.within(format!("halt of hart {hart}")))
    }

    fn halt_hart(&mut self, hart: u32) -> Result<(), DebugModuleError> {
        let control = Self::control(hart)?;
        let mut request = control.to_vec();
        request.push(("haltreq", true.into()));
        self.write_fields(&DMCONTROL, &request)?;
        self.hart = hart;

        self.poll(&DMSTATUS, "hart to halt", |status| status.flag("allhalted"))?;

        // clear the halt request
        self.write_fields(&DMCONTROL, &control)
    }

    /// Resumes `hart` and waits for the acknowledgement.
    #[tracing::instrument(skip(self))]
    pub fn resume(&mut self, hart: u32) -> Result<(), DebugModuleError> {
        self.resume_hart(hart)
            .map_err(|error| error.within(format!("resume of hart {hart}")))
    }

    fn resume_hart(&mut self, hart: u32) -> Result<(), DebugModuleError> {
        let control = Self::control(hart)?;
        let mut request = control.to_vec();
        request.push(("resumereq", true.into()));
        self.write_fields(&DMCONTROL, &request)?;
        self.hart = hart;

        self.poll(&DMSTATUS, "hart to resume", |status| {
            status.flag("anyresumeack")
        })?;

        // clear resume request
        self.write_fields(&DMCONTROL, &control)
    }

    pub fn is_halted(&mut self) -> Result<bool, DebugModuleError> {
        Ok(self.status()?.flag("allhalted"))
    }

    /// Decoded `dmstatus`.
    pub fn status(&mut self) -> Result<FieldMap, DebugModuleError> {
        self.read_fields(&DMSTATUS)
    }

    /// Decoded `hartinfo`.
    pub fn hart_info(&mut self) -> Result<FieldMap, DebugModuleError> {
        self.read_fields(&HARTINFO)
    }

    /// Decoded `sbcs`.
    pub fn system_bus_info(&mut self) -> Result<FieldMap, DebugModuleError> {
        self.read_fields(&SBCS)
    }

    /// Writes `command` and waits for the abstract command to finish.
    ///
    /// A failed command leaves `cmderr` set in the Debug Module; it is cleared here before the
    /// error is returned.
    fn execute_abstract_command(
        &mut self,
        command: &[(&str, FieldValue)],
    ) -> Result<(), DebugModuleError> {
        self.write_fields(&COMMAND, command)?;

        let status = self.poll(&ABSTRACTCS, "abstract command", |status| {
            !status.flag("busy") || status.raw("cmderr") != Some(0)
        })?;

        let cmderr = status.raw("cmderr").unwrap_or_default();
        if cmderr != 0 {
            let kind = AbstractCommandErrorKind::parse(cmderr);
            tracing::debug!("abstract command failed with {kind:?}, clearing cmderr");

            // cmderr is write-1-to-clear
            self.write_fields(&ABSTRACTCS, &[("cmderr", FieldValue::Int(0b111))])?;
            return Err(DebugModuleError::AbstractCommand(kind));
        }

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn access_register(
        &mut self,
        register: RegisterRef<'_>,
        value: Option<u32>,
    ) -> Result<u32, DebugModuleError> {
        let regno = register
            .number()
            .ok_or_else(|| DebugModuleError::UnknownRegister(register.to_string()))?;

        if let Some(value) = value {
            self.dmi.dmi_write(DATA0.address, value)?;
        }

        self.execute_abstract_command(&[
            ("cmdtype", "access_register".into()),
            ("aarsize", "32bit".into()),
            ("transfer", true.into()),
            ("write", value.is_some().into()),
            ("regno", regno.into()),
        ])?;

        match value {
            Some(value) => Ok(value),
            None => Ok(self.dmi.dmi_read(DATA0.address)?),
        }
    }

    /// Reads a CSR or GPR through an abstract command.
    pub fn read_csr<'r>(
        &mut self,
        register: impl Into<RegisterRef<'r>>,
    ) -> Result<u32, DebugModuleError> {
        let register = register.into();
        self.access_register(register, None)
            .map_err(|error| error.annotate(register, Access::Read))
    }

    /// Writes a CSR or GPR through an abstract command.
    pub fn write_csr<'r>(
        &mut self,
        register: impl Into<RegisterRef<'r>>,
        value: u32,
    ) -> Result<(), DebugModuleError> {
        let register = register.into();
        self.access_register(register, Some(value))
            .map(|_| ())
            .map_err(|error| error.annotate(register, Access::Write))
    }

    /// Sets the address the halted hart resumes at.
    pub fn set_pc(&mut self, address: u32) -> Result<(), DebugModuleError> {
        if !self.is_halted()? {
            return Err(DebugModuleError::NotHalted);
        }
        self.write_csr(csr::DPC, address)
    }

    /// Executes a single instruction on the halted hart.
    #[tracing::instrument(skip(self))]
    pub fn step(&mut self) -> Result<(), DebugModuleError> {
        if !self.is_halted()? {
            return Err(DebugModuleError::NotHalted);
        }

        let dcsr = self.read_csr(csr::DCSR)?;
        let stepping = DCSR.encode(dcsr.into(), &[("step", true.into())])?;
        self.write_csr(csr::DCSR, stepping as u32)?;

        self.resume(self.hart)?;
        self.poll(&DMSTATUS, "hart to halt after step", |status| {
            status.flag("allhalted")
        })?;

        let dcsr = self.read_csr(csr::DCSR)?;
        let cleared = DCSR.encode(dcsr.into(), &[("step", false.into())])?;
        self.write_csr(csr::DCSR, cleared as u32)
    }

    /// Number of trigger units, found by probing `tselect`.
    pub fn hw_breakpoint_units(&mut self) -> Result<u32, DebugModuleError> {
        let mut units = 0;
        for index in 0..MAX_TRIGGERS {
            self.write_csr(csr::TSELECT, index)?;
            if self.read_csr(csr::TSELECT)? != index {
                break;
            }

            let tdata1 = MCONTROL.decode(self.read_csr(csr::TDATA1)?.into())?;
            if tdata1.raw("type") == Some(0) {
                break;
            }
            units += 1;
        }
        Ok(units)
    }

    fn select_trigger(&mut self, unit: u32) -> Result<(), DebugModuleError> {
        self.write_csr(csr::TSELECT, unit)?;
        if self.read_csr(csr::TSELECT)? != unit {
            return Err(DebugModuleError::NoSuchBreakpoint(unit));
        }
        Ok(())
    }

    /// Programs trigger `unit` to enter debug mode when executing `address`.
    pub fn set_hw_breakpoint(&mut self, unit: u32, address: u32) -> Result<(), DebugModuleError> {
        self.select_trigger(unit)?;

        let tdata1 = MCONTROL.encode(
            0,
            &[
                ("type", 2u32.into()),
                ("dmode", true.into()),
                ("action", 1u32.into()),
                ("m", true.into()),
                ("s", true.into()),
                ("u", true.into()),
                ("execute", true.into()),
            ],
        )?;
        self.write_csr(csr::TDATA1, tdata1 as u32)?;
        self.write_csr(csr::TDATA2, address)
    }

    pub fn clear_hw_breakpoint(&mut self, unit: u32) -> Result<(), DebugModuleError> {
        self.select_trigger(unit)?;
        self.write_csr(csr::TDATA1, 0)?;
        self.write_csr(csr::TDATA2, 0)
    }

    /// Waits until the system bus is idle and turns a latched bus error into an error.
    ///
    /// With `check`, the bus capabilities are verified the first time around.
    pub fn wait_sb_idle(&mut self, check: bool) -> Result<FieldMap, DebugModuleError> {
        let sbcs = self.poll(&SBCS, "system bus", |sbcs| !sbcs.flag("sbbusy"))?;

        if check && self.sbasize.is_none() {
            if sbcs.raw("sbversion") != Some(1) {
                return Err(DebugModuleError::Unsupported("sbversion 1"));
            }
            let sbasize = sbcs.raw("sbasize").unwrap_or_default();
            if sbasize == 0 {
                return Err(DebugModuleError::Unsupported("system bus access"));
            }
            if !sbcs.flag("sbaccess32") {
                return Err(DebugModuleError::Unsupported("32 bit accesses"));
            }
            tracing::debug!("system bus: {sbcs}");
            self.sbasize = Some(sbasize);
        }

        if sbcs.flag("sbbusyerror") {
            self.write_fields(&SBCS, &[("sbbusyerror", true.into())])?;
            return Err(DebugModuleError::SystemBusBusy);
        }

        let sberror = sbcs.raw("sberror").unwrap_or_default();
        if sberror != 0 {
            // sberror is write-1-to-clear
            self.write_fields(&SBCS, &[("sberror", FieldValue::Int(0b111))])?;
            return Err(DebugModuleError::SystemBus(SystemBusErrorKind::parse(sberror)));
        }

        Ok(sbcs)
    }

    fn configure_sb(
        &mut self,
        access: &'static str,
        readonaddr: bool,
        autoincrement: bool,
        readondata: bool,
    ) -> Result<(), DebugModuleError> {
        self.write_fields(
            &SBCS,
            &[
                ("sbaccess", access.into()),
                ("sbreadonaddr", readonaddr.into()),
                ("sbautoincrement", autoincrement.into()),
                ("sbreadondata", readondata.into()),
            ],
        )
    }

    /// Writes the system bus address. `sbaddress0` goes last since it may trigger a read.
    fn set_sb_address(&mut self, address: u64) -> Result<(), DebugModuleError> {
        let sbasize = self.sbasize.unwrap_or(32);
        if sbasize < 64 && address >> sbasize != 0 {
            return Err(DebugModuleError::AddressTooWide { address, sbasize });
        }

        if sbasize > 32 {
            self.dmi.dmi_write(SBADDRESS1.address, (address >> 32) as u32)?;
        }
        self.dmi.dmi_write(SBADDRESS0.address, address as u32)?;
        Ok(())
    }

    fn check_alignment(address: u64, alignment: u64) -> Result<(), DebugModuleError> {
        if address % alignment != 0 {
            return Err(DebugModuleError::Unaligned { address, alignment });
        }
        Ok(())
    }

    fn require_64bit(sbcs: &FieldMap) -> Result<(), DebugModuleError> {
        if !sbcs.flag("sbaccess64") {
            return Err(DebugModuleError::Unsupported("64 bit accesses"));
        }
        Ok(())
    }

    pub fn read32(&mut self, address: u64) -> Result<u32, DebugModuleError> {
        self.sb_read32(address)
            .map_err(|error| error.within(format!("read32 at {address:#x}")))
    }

    pub fn write32(&mut self, address: u64, value: u32) -> Result<(), DebugModuleError> {
        self.sb_write32(address, value)
            .map_err(|error| error.within(format!("write32 at {address:#x}")))
    }

    pub fn read64(&mut self, address: u64) -> Result<u64, DebugModuleError> {
        self.sb_read64(address)
            .map_err(|error| error.within(format!("read64 at {address:#x}")))
    }

    pub fn write64(&mut self, address: u64, value: u64) -> Result<(), DebugModuleError> {
        self.sb_write64(address, value)
            .map_err(|error| error.within(format!("write64 at {address:#x}")))
    }

    fn sb_read32(&mut self, address: u64) -> Result<u32, DebugModuleError> {
        Self::check_alignment(address, 4)?;
        self.wait_sb_idle(true)?;

        self.configure_sb("32bit", true, false, false)?;
        self.set_sb_address(address)?;
        self.wait_sb_idle(false)?;

        Ok(self.dmi.dmi_read(SBDATA0.address)?)
    }

    fn sb_write32(&mut self, address: u64, value: u32) -> Result<(), DebugModuleError> {
        Self::check_alignment(address, 4)?;
        self.wait_sb_idle(true)?;

        self.configure_sb("32bit", false, false, false)?;
        self.set_sb_address(address)?;
        self.dmi.dmi_write(SBDATA0.address, value)?;
        self.wait_sb_idle(false)?;
        Ok(())
    }

    fn sb_read64(&mut self, address: u64) -> Result<u64, DebugModuleError> {
        Self::check_alignment(address, 8)?;
        let sbcs = self.wait_sb_idle(true)?;
        Self::require_64bit(&sbcs)?;

        self.configure_sb("64bit", true, false, false)?;
        self.set_sb_address(address)?;
        self.wait_sb_idle(false)?;

        let high = self.dmi.dmi_read(SBDATA1.address)?;
        let low = self.dmi.dmi_read(SBDATA0.address)?;
        Ok((u64::from(high) << 32) | u64::from(low))
    }

    fn sb_write64(&mut self, address: u64, value: u64) -> Result<(), DebugModuleError> {
        Self::check_alignment(address, 8)?;
        let sbcs = self.wait_sb_idle(true)?;
        Self::require_64bit(&sbcs)?;

        self.configure_sb("64bit", false, false, false)?;
        self.set_sb_address(address)?;

        // Writing sbdata0 starts the access, so the upper half goes first.
        self.dmi.dmi_write(SBDATA1.address, (value >> 32) as u32)?;
        self.dmi.dmi_write(SBDATA0.address, value as u32)?;
        self.wait_sb_idle(false)?;
        Ok(())
    }

    /// Streams `size` bytes between target memory at `address` and `op`'s endpoint, one 32 bit
    /// word per system bus access with address auto-increment.
    ///
    /// With `no_check` the bus is not polled between words, only once at the end.
    #[tracing::instrument(skip(self, op))]
    pub fn memory_copy(
        &mut self,
        op: CopyOp<'_>,
        address: u64,
        size: usize,
        no_check: bool,
    ) -> Result<(), DebugModuleError> {
        let direction = match op {
            CopyOp::Read(_) => "read",
            CopyOp::Write(_) => "write",
        };
        self.copy_words(op, address, size, no_check).map_err(|error| {
            error.within(format!("memory {direction} of {size} bytes at {address:#x}"))
        })
    }

    fn copy_words(
        &mut self,
        op: CopyOp<'_>,
        address: u64,
        size: usize,
        no_check: bool,
    ) -> Result<(), DebugModuleError> {
        Self::check_alignment(address, 4)?;
        if size % 4 != 0 {
            return Err(DebugModuleError::InvalidSize(size));
        }
        if size == 0 {
            return Ok(());
        }

        self.wait_sb_idle(true)?;
        let words = size / 4;

        match op {
            CopyOp::Read(sink) => {
                // Every sbdata0 read fetches the next word.
                self.configure_sb("32bit", true, true, true)?;
                self.set_sb_address(address)?;

                for index in 0..words {
                    if index + 1 == words {
                        // Stop before the last word so nothing beyond the range is fetched.
                        self.wait_sb_idle(false)?;
                        self.configure_sb("32bit", false, true, false)?;
                    } else if !no_check {
                        self.wait_sb_idle(false)?;
                    }

                    let word = self.dmi.dmi_read(SBDATA0.address)?;
                    sink.write_all(&word.to_le_bytes())?;
                }
            }
            CopyOp::Write(source) => {
                self.configure_sb("32bit", false, true, false)?;
                self.set_sb_address(address)?;

                let mut word = [0u8; 4];
                for _ in 0..words {
                    source.read_exact(&mut word)?;
                    self.dmi.dmi_write(SBDATA0.address, u32::from_le_bytes(word))?;
                    if !no_check {
                        self.wait_sb_idle(false)?;
                    }
                }
            }
        }

        self.wait_sb_idle(false)?;
        Ok(())
    }
}
