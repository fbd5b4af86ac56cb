//! A simulated Debug Module with a single hart and a small RAM on the system bus.

use std::collections::HashMap;

use super::csr::{self, GPR_BASE};
use super::registers::{
    ABSTRACTCS, COMMAND, DATA0, DATA1, DMCONTROL, DMSTATUS, HARTINFO, SBADDRESS0, SBADDRESS1,
    SBCS, SBDATA0, SBDATA1,
};
use crate::dtm::{DmiAccess, DmiError, DtmError};

/// Start of the simulated RAM on the system bus.
pub const RAM_BASE: u64 = 0x8000_0000;

const HALTREQ: u32 = 1 << 31;
const RESUMEREQ: u32 = 1 << 30;
const DMACTIVE: u32 = 1;

/// `sbreadonaddr`, `sbaccess`, `sbautoincrement` and `sbreadondata`.
const SBCS_CONFIG: u32 = 0x3f << 15;

#[derive(Debug)]
pub struct MockDebugModule {
    /// `dmstatus.version`
    pub version: u32,
    /// `dmactive` never reads back as set.
    pub stuck_inactive: bool,
    /// The hart never reacts to `haltreq`.
    pub ignore_haltreq: bool,
    pub halted: bool,
    pub resumeack: bool,
    pub dmcontrol: u32,

    /// CSRs and GPRs by abstract register number. Other CSR numbers raise an exception.
    pub csrs: HashMap<u16, u32>,
    pub triggers: Vec<(u32, u32)>,
    pub tselect: u32,
    pub data: [u32; 2],
    pub cmderr: u32,
    /// Every value written to `command`.
    pub commands: Vec<u32>,
    /// Instructions executed with `dcsr.step` set.
    pub steps: usize,

    pub memory: Vec<u8>,
    pub sbasize: u32,
    pub sbcs: u32,
    pub sbaddress: u64,
    pub sbdata: [u32; 2],
    pub sberror: u32,
    pub sbbusyerror: bool,
    /// Number of system bus reads performed.
    pub bus_reads: usize,

    /// Every DMI write, in order.
    pub writes: Vec<(u32, u32)>,
    /// `abstractcs.busy` never clears.
    pub abstract_busy: bool,
    /// `sbcs.sbbusy` never clears.
    pub sb_busy: bool,
    /// DMI accesses to this address fail with a busy DMI status.
    pub dmi_busy_at: Option<u32>,
}

impl MockDebugModule {
    pub fn new() -> Self {
        let mut csrs = HashMap::new();
        csrs.insert(0x301, 0x4014_1105);
        csrs.insert(0x300, 0);
        csrs.insert(0x340, 0);
        csrs.insert(csr::DPC, RAM_BASE as u32);
        csrs.insert(csr::DCSR, 0x4000_0003);

        Self {
            version: 2,
            stuck_inactive: false,
            ignore_haltreq: false,
            halted: false,
            resumeack: false,
            dmcontrol: 0,
            csrs,
            triggers: vec![(2 << 28, 0); 2],
            tselect: 0,
            data: [0; 2],
            cmderr: 0,
            commands: Vec::new(),
            steps: 0,
            memory: vec![0; 256],
            sbasize: 32,
            sbcs: 0,
            sbaddress: 0,
            sbdata: [0; 2],
            sberror: 0,
            sbbusyerror: false,
            bus_reads: 0,
            writes: Vec::new(),
            abstract_busy: false,
            sb_busy: false,
            dmi_busy_at: None,
        }
    }

    /// `(tdata1, tdata2)` of trigger `index`.
    pub fn trigger(&self, index: usize) -> (u32, u32) {
        self.triggers[index]
    }

    fn dmstatus(&self) -> u32 {
        let mut status = self.version | (1 << 7);
        if self.halted {
            status |= 0b11 << 8;
        } else {
            status |= 0b11 << 10;
        }
        if self.resumeack {
            status |= 0b11 << 16;
        }
        status
    }

    fn sbcs(&self) -> u32 {
        (1 << 29)
            | (u32::from(self.sbbusyerror) << 22)
            | (u32::from(self.sb_busy) << 21)
            | (self.sbcs & SBCS_CONFIG)
            | (self.sberror << 12)
            | (self.sbasize << 5)
            | 0b1111
    }

    fn write_dmcontrol(&mut self, value: u32) {
        self.dmcontrol = value & !(HALTREQ | RESUMEREQ);
        if self.stuck_inactive {
            self.dmcontrol &= !DMACTIVE;
        }

        if value & HALTREQ != 0 && !self.ignore_haltreq {
            self.halted = true;
        }

        if value & RESUMEREQ != 0 && self.halted {
            self.resumeack = true;
            let stepping = self.csrs.get(&csr::DCSR).is_some_and(|dcsr| dcsr & 0b100 != 0);
            if stepping {
                self.steps += 1;
            } else {
                self.halted = false;
            }
        }
    }

    fn read_csr(&self, regno: u16) -> Option<u32> {
        match regno {
            csr::TSELECT => Some(self.tselect),
            csr::TDATA1 => Some(self.triggers[self.tselect as usize].0),
            csr::TDATA2 => Some(self.triggers[self.tselect as usize].1),
            gpr if (GPR_BASE..GPR_BASE + 32).contains(&gpr) => {
                Some(self.csrs.get(&gpr).copied().unwrap_or_default())
            }
            other => self.csrs.get(&other).copied(),
        }
    }

    fn write_csr(&mut self, regno: u16, value: u32) -> Option<()> {
        match regno {
            // Selecting a missing trigger leaves tselect unchanged.
            csr::TSELECT => {
                if (value as usize) < self.triggers.len() {
                    self.tselect = value;
                }
            }
            csr::TDATA1 => self.triggers[self.tselect as usize].0 = value,
            csr::TDATA2 => self.triggers[self.tselect as usize].1 = value,
            gpr if (GPR_BASE..GPR_BASE + 32).contains(&gpr) => {
                self.csrs.insert(gpr, value);
            }
            other => *self.csrs.get_mut(&other)? = value,
        }
        Some(())
    }

    fn execute(&mut self, command: u32) {
        self.commands.push(command);
        if self.cmderr != 0 {
            return;
        }

        let cmdtype = command >> 24;
        let aarsize = (command >> 20) & 0b111;
        if cmdtype != 0 || aarsize != 2 {
            self.cmderr = 2;
            return;
        }
        if !self.halted {
            self.cmderr = 4;
            return;
        }

        let transfer = command & (1 << 17) != 0;
        let write = command & (1 << 16) != 0;
        let regno = command as u16;
        if !transfer {
            return;
        }

        let done = if write {
            self.write_csr(regno, self.data[0])
        } else {
            self.read_csr(regno).map(|value| self.data[0] = value)
        };
        if done.is_none() {
            self.cmderr = 3;
        }
    }

    fn access_size(&self) -> u64 {
        1 << ((self.sbcs >> 17) & 0b111)
    }

    /// Byte range of the current bus access in `memory`, or the `sberror` it raises.
    fn bus_range(&self) -> Result<std::ops::Range<usize>, u32> {
        let size = self.access_size();
        if self.sbaddress % size != 0 {
            return Err(3);
        }
        let offset = self
            .sbaddress
            .checked_sub(RAM_BASE)
            .filter(|offset| offset + size <= self.memory.len() as u64)
            .ok_or(2u32)?;
        Ok(offset as usize..(offset + size) as usize)
    }

    fn bus_read(&mut self) {
        if self.sberror != 0 {
            return;
        }
        match self.bus_range() {
            Ok(range) => {
                let mut bytes = [0u8; 8];
                bytes[..range.len()].copy_from_slice(&self.memory[range]);
                let value = u64::from_le_bytes(bytes);
                self.sbdata = [value as u32, (value >> 32) as u32];
                self.bus_reads += 1;
                self.autoincrement();
            }
            Err(error) => self.sberror = error,
        }
    }

    fn bus_write(&mut self) {
        if self.sberror != 0 {
            return;
        }
        match self.bus_range() {
            Ok(range) => {
                let value = (u64::from(self.sbdata[1]) << 32) | u64::from(self.sbdata[0]);
                let len = range.len();
                self.memory[range].copy_from_slice(&value.to_le_bytes()[..len]);
                self.autoincrement();
            }
            Err(error) => self.sberror = error,
        }
    }

    fn autoincrement(&mut self) {
        if self.sbcs & (1 << 16) != 0 {
            self.sbaddress += self.access_size();
        }
    }
}

impl DmiAccess for MockDebugModule {
    fn dmi_read(&mut self, address: u32) -> Result<u32, DtmError> {
        if self.dmi_busy_at == Some(address) {
            return Err(DmiError::Busy.into());
        }

        let value = match address {
            a if a == DATA0.address => self.data[0],
            a if a == DATA1.address => self.data[1],
            a if a == DMCONTROL.address => self.dmcontrol,
            a if a == DMSTATUS.address => self.dmstatus(),
            a if a == HARTINFO.address => 2 << 12,
            a if a == ABSTRACTCS.address => {
                (u32::from(self.abstract_busy) << 12) | (self.cmderr << 8) | 2
            }
            a if a == SBCS.address => self.sbcs(),
            a if a == SBADDRESS0.address => self.sbaddress as u32,
            a if a == SBADDRESS1.address => (self.sbaddress >> 32) as u32,
            a if a == SBDATA0.address => {
                let value = self.sbdata[0];
                if self.sbcs & (1 << 15) != 0 {
                    self.bus_read();
                }
                value
            }
            a if a == SBDATA1.address => self.sbdata[1],
            _ => 0,
        };
        Ok(value)
    }

    fn dmi_write(&mut self, address: u32, value: u32) -> Result<(), DtmError> {
        if self.dmi_busy_at == Some(address) {
            return Err(DmiError::Busy.into());
        }
        self.writes.push((address, value));

        match address {
            a if a == DATA0.address => self.data[0] = value,
            a if a == DATA1.address => self.data[1] = value,
            a if a == DMCONTROL.address => self.write_dmcontrol(value),
            a if a == ABSTRACTCS.address => self.cmderr &= !((value >> 8) & 0b111),
            a if a == COMMAND.address => self.execute(value),
            a if a == SBCS.address => {
                self.sbcs = value & SBCS_CONFIG;
                self.sberror &= !((value >> 12) & 0b111);
                if value & (1 << 22) != 0 {
                    self.sbbusyerror = false;
                }
            }
            a if a == SBADDRESS0.address => {
                self.sbaddress = (self.sbaddress & !0xffff_ffff) | u64::from(value);
                if self.sbcs & (1 << 20) != 0 {
                    self.bus_read();
                }
            }
            a if a == SBADDRESS1.address => {
                self.sbaddress = (self.sbaddress & 0xffff_ffff) | (u64::from(value) << 32);
            }
            a if a == SBDATA0.address => {
                self.sbdata[0] = value;
                self.bus_write();
            }
            a if a == SBDATA1.address => self.sbdata[1] = value,
            _ => {}
        }
        Ok(())
    }
}
