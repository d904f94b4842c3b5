// https://wiki.osdev.org/RSDP
// https://wiki.osdev.org/RSDT
// https://wiki.osdev.org/FADT
use crate::io_port::IoPort;
use crate::log;
use crate::memory::{phys_to_virt, PhysicalAddress, VirtualAddress};
use crate::multiboot2::acpi_new_rsdp::AcpiNewRsdp;
use crate::multiboot2::acpi_old_rsdp::AcpiOldRsdp;
use crate::multiboot2::MbBootInfo;
use spin::RwLock;

/// How many PM1a reads the ACPI-enable handshake is allowed before giving up.
const ENABLE_MAX_POLLS: u32 = 100_000;

pub static ACPI: Acpi = Acpi(RwLock::new(AcpiInner {
    root_sdt: None,
    fadt: None,
    dsdt: None,
    power_profile: PowerProfile::Unspecified,
}));

/// Common header of every system description table.
#[repr(C, packed)]
pub struct SdtHeader {
    pub signature: [u8; 4],
    pub length: u32,
    pub revision: u8,
    pub checksum: u8,
    pub oemid: [u8; 6],
    pub oem_table_id: [u8; 8],
    pub oem_revision: u32,
    pub creator_id: u32,
    pub creator_revision: u32,
}

impl SdtHeader {
    /// The raw bytes the checksum rule covers.
    pub fn bytes(&self) -> &[u8] {
        let len = self.length as usize;
        assert!(len >= size_of::<SdtHeader>());
        // Safety: the table declares its own length and firmware tables are
        // immutable for the lifetime of the kernel
        unsafe { core::slice::from_raw_parts(self as *const _ as *const u8, len) }
    }
}

/// ACPI generic address structure.
#[repr(C, packed)]
pub struct GenericAddress {
    pub address_space: u8,
    pub bit_width: u8,
    pub bit_offset: u8,
    pub access_size: u8,
    pub address: u64,
}

/// The fields of the fixed ACPI description table the kernel consumes. Only
/// the prefix up to `x_dsdt` is declared; tables from old firmware may end
/// before that, which is why `x_dsdt` access is length checked.
#[repr(C, packed)]
pub struct Fadt {
    pub header: SdtHeader,
    pub firmware_ctrl: u32,
    pub dsdt: u32,
    reserved: u8,
    pub preferred_power_management_profile: u8,
    pub sci_interrupt: u16,
    pub smi_command_port: u32,
    pub acpi_enable: u8,
    pub acpi_disable: u8,
    pub s4bios_req: u8,
    pub pstate_control: u8,
    pub pm1a_event_block: u32,
    pub pm1b_event_block: u32,
    pub pm1a_control_block: u32,
    pub pm1b_control_block: u32,
    pub pm2_control_block: u32,
    pub pm_timer_block: u32,
    pub gpe0_block: u32,
    pub gpe1_block: u32,
    pub pm1_event_length: u8,
    pub pm1_control_length: u8,
    pub pm2_control_length: u8,
    pub pm_timer_length: u8,
    pub gpe0_length: u8,
    pub gpe1_length: u8,
    pub gpe1_base: u8,
    pub cstate_control: u8,
    pub worst_c2_latency: u16,
    pub worst_c3_latency: u16,
    pub flush_size: u16,
    pub flush_stride: u16,
    pub duty_offset: u8,
    pub duty_width: u8,
    pub day_alarm: u8,
    pub month_alarm: u8,
    pub century: u8,
    pub boot_architecture_flags: u16,
    reserved_2: u8,
    pub flags: u32,
    pub reset_reg: GenericAddress,
    pub reset_value: u8,
    reserved_3: [u8; 3],
    pub x_firmware_control: u64,
    pub x_dsdt: u64,
}

/// Preferred power management profile advertised by the FADT.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PowerProfile {
    Unspecified,
    Desktop,
    Mobile,
    Workstation,
    EnterpriseServer,
    SohoServer,
    AppliancePc,
    PerformanceServer,
}

impl PowerProfile {
    fn from_fadt_byte(profile: u8) -> Option<PowerProfile> {
        match profile {
            0 => Some(PowerProfile::Unspecified),
            1 => Some(PowerProfile::Desktop),
            2 => Some(PowerProfile::Mobile),
            3 => Some(PowerProfile::Workstation),
            4 => Some(PowerProfile::EnterpriseServer),
            5 => Some(PowerProfile::SohoServer),
            6 => Some(PowerProfile::AppliancePc),
            7 => Some(PowerProfile::PerformanceServer),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum AcpiError {
    /// The boot info carries no RSDP tag at all.
    MissingRsdp,
    InvalidRsdpChecksum,
    InvalidRootSdtChecksum,
    MissingFadt,
    /// The PM1a control block never reported ACPI mode within the poll budget.
    EnableTimeout,
    NotInitialized,
}

struct RootSdt {
    /// Higher half address of the RSDT or XSDT.
    addr: VirtualAddress,
    /// XSDT entries are 64 bit physical pointers, RSDT entries 32 bit.
    is_xsdt: bool,
}

struct AcpiInner {
    root_sdt: Option<RootSdt>,
    fadt: Option<&'static Fadt>,
    dsdt: Option<&'static SdtHeader>,
    power_profile: PowerProfile,
}

pub struct Acpi(RwLock<AcpiInner>);

// Safety: the inner pointers reference immutable firmware tables.
unsafe impl Send for AcpiInner {}
unsafe impl Sync for AcpiInner {}

/// Byte-sum checksum rule shared by every ACPI structure: the bytes over the
/// declared length must sum to zero mod 256.
pub fn checksum_ok(bytes: &[u8]) -> bool {
    bytes.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte)) == 0
}

impl Acpi {
    /// Discovers the ACPI tables from the RSDP in the boot info: validates
    /// the RSDP checksums, walks the RSDT/XSDT, caches the FADT and the DSDT
    /// and finally switches the platform into ACPI mode.
    pub fn init(&self, mb_info: &MbBootInfo) -> Result<(), AcpiError> {
        let (root_phys, is_xsdt, revision) = Self::locate_root_sdt(mb_info)?;

        let root_sdt = unsafe { &*(phys_to_virt(root_phys) as *const SdtHeader) };
        if !checksum_ok(root_sdt.bytes()) {
            return Err(AcpiError::InvalidRootSdtChecksum);
        }

        log!(ok, "ACPI revision {}, {} at {:#x}.", revision, if is_xsdt { "XSDT" } else { "RSDT" }, root_phys);

        {
            let inner = &mut *self.0.write();
            inner.root_sdt = Some(RootSdt { addr: phys_to_virt(root_phys), is_xsdt });

            // the FADT is the one table the kernel itself depends on
            let fadt = inner.find_in_root(b"FACP", 0).ok_or(AcpiError::MissingFadt)?;
            let fadt = unsafe { &*(fadt as *const SdtHeader as *const Fadt) };
            inner.fadt = Some(fadt);

            inner.dsdt = inner.locate_dsdt(fadt);
            if inner.dsdt.is_none() {
                log!(warn, "ACPI: the FADT names no valid DSDT.");
            }

            inner.power_profile = match PowerProfile::from_fadt_byte(fadt.preferred_power_management_profile) {
                Some(profile) => profile,
                None => {
                    log!(warn, "ACPI power profile id {} is out of range.", fadt.preferred_power_management_profile);
                    PowerProfile::Unspecified
                }
            };
        }

        // hand the platform over to ACPI; a timeout is worth a warning but
        // the kernel runs fine in legacy mode
        match self.enable() {
            Ok(()) => log!(ok, "ACPI mode enabled."),
            Err(AcpiError::EnableTimeout) => log!(warn, "ACPI enable timed out, staying in legacy mode."),
            Err(_) => unreachable!(),
        }

        Ok(())
    }

    /// Pulls the RSDP out of the boot info, preferring the v2 tag, and
    /// validates its checksums. Returns the physical root SDT address.
    fn locate_root_sdt(mb_info: &MbBootInfo) -> Result<(PhysicalAddress, bool, u8), AcpiError> {
        if let Some(tag) = mb_info.get_tag::<AcpiNewRsdp>() {
            let rsdp = tag.rsdp();
            // the v1 part heads the structure, so a cast reaches it without
            // referencing into the packed struct
            let v1 = unsafe { &*(rsdp as *const crate::multiboot2::acpi_new_rsdp::RsdpV2 as *const crate::multiboot2::acpi_old_rsdp::RsdpV1) };
            if !checksum_ok(v1.bytes()) {
                return Err(AcpiError::InvalidRsdpChecksum);
            }
            // revision >= 2 additionally checksums the whole structure
            if !checksum_ok(rsdp.bytes()) {
                return Err(AcpiError::InvalidRsdpChecksum);
            }

            return Ok((rsdp.xsdt_address as PhysicalAddress, true, v1.revision));
        }

        if let Some(tag) = mb_info.get_tag::<AcpiOldRsdp>() {
            let rsdp = tag.rsdp();
            if !checksum_ok(rsdp.bytes()) {
                return Err(AcpiError::InvalidRsdpChecksum);
            }

            return Ok((rsdp.rsdt_address as PhysicalAddress, false, rsdp.revision));
        }

        Err(AcpiError::MissingRsdp)
    }

    /// Looks a table up by signature and occurrence index.
    ///
    /// "DSDT" and "FACP"/"FADT" are special cased: the DSDT is not in the
    /// root pointer list (it hangs off the FADT) and the FADT is cached.
    /// Every table returned here has passed the checksum rule.
    pub fn find_table(&self, signature: &[u8; 4], index: u64) -> Option<&'static SdtHeader> {
        let inner = &*self.0.read();

        if signature == b"DSDT" {
            return inner.dsdt;
        }
        if signature == b"FACP" || signature == b"FADT" {
            // the header is the first field, a plain cast avoids taking a
            // reference into the packed struct
            return inner.fadt.map(|fadt| unsafe { &*(fadt as *const Fadt as *const SdtHeader) });
        }

        inner.find_in_root(signature, index)
    }

    pub fn power_profile(&self) -> PowerProfile {
        self.0.read().power_profile
    }

    /// Writes the FADT's enable command to the SMI port and waits for the
    /// PM1a control block to acknowledge ACPI mode, with a bounded poll.
    fn enable(&self) -> Result<(), AcpiError> {
        let inner = &*self.0.read();
        let fadt = inner.fadt.ok_or(AcpiError::NotInitialized)?;

        let smi_port = fadt.smi_command_port;
        let enable_value = fadt.acpi_enable;
        let pm1a = fadt.pm1a_control_block;

        // hardware-reduced or already-enabled platforms have nothing to do
        if smi_port == 0 || enable_value == 0 {
            return Ok(());
        }
        if IoPort::read_u16(pm1a as u16) & 1 == 1 {
            return Ok(());
        }

        IoPort::write_u8(smi_port as u16, enable_value);

        for _ in 0..ENABLE_MAX_POLLS {
            if IoPort::read_u16(pm1a as u16) & 1 == 1 {
                return Ok(());
            }
            IoPort::io_wait();
        }

        Err(AcpiError::EnableTimeout)
    }
}

impl AcpiInner {
    /// Walks the root table's pointer array. Tables failing the checksum
    /// rule are skipped as if they did not exist.
    fn find_in_root(&self, signature: &[u8; 4], mut index: u64) -> Option<&'static SdtHeader> {
        let root = self.root_sdt.as_ref()?;
        let header = unsafe { &*(root.addr as *const SdtHeader) };

        let entry_size = if root.is_xsdt { 8 } else { 4 };
        let entry_count = (header.length as usize - size_of::<SdtHeader>()) / entry_size;
        let entries_base = root.addr + size_of::<SdtHeader>();

        for i in 0..entry_count {
            let entry_addr = entries_base + i * entry_size;
            // the pointer array is only 4 byte aligned inside an XSDT
            let table_phys = if root.is_xsdt {
                unsafe { core::ptr::read_unaligned(entry_addr as *const u64) as PhysicalAddress }
            } else {
                unsafe { core::ptr::read_unaligned(entry_addr as *const u32) as PhysicalAddress }
            };

            if table_phys == 0 {
                continue;
            }

            let table = unsafe { &*(phys_to_virt(table_phys) as *const SdtHeader) };
            let table_signature = table.signature;
            if &table_signature != signature {
                continue;
            }

            if !checksum_ok(table.bytes()) {
                log!(warn, "ACPI table {:?} at {:#x} fails its checksum, ignoring it.",
                    core::str::from_utf8(signature).unwrap_or("????"), table_phys);
                continue;
            }

            if index == 0 {
                return Some(table);
            }
            index -= 1;
        }

        None
    }

    /// Resolves the DSDT through the FADT, preferring the 64 bit pointer
    /// when the table is long enough to contain it and the value is nonzero.
    fn locate_dsdt(&self, fadt: &Fadt) -> Option<&'static SdtHeader> {
        let x_dsdt_end = core::mem::offset_of!(Fadt, x_dsdt) + size_of::<u64>();

        let dsdt_phys = if fadt.header.length as usize >= x_dsdt_end && fadt.x_dsdt != 0 {
            fadt.x_dsdt as PhysicalAddress
        } else {
            fadt.dsdt as PhysicalAddress
        };

        if dsdt_phys == 0 {
            return None;
        }

        let dsdt = unsafe { &*(phys_to_virt(dsdt_phys) as *const SdtHeader) };
        if !checksum_ok(dsdt.bytes()) {
            return None;
        }

        Some(dsdt)
    }
}
