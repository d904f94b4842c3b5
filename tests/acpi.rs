#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(borealos::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use borealos::acpi::{checksum_ok, PowerProfile, ACPI};
use core::panic::PanicInfo;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    borealos::test_panic_handler(info);
}

/// # Safety
///
/// Called once by the boot assembly with the Multiboot2 register values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn main(mb_magic: u64, mb_boot_info_addr: *const u8) -> ! {
    unsafe { borealos::init(mb_magic, mb_boot_info_addr) };
    test_main();
    borealos::hlt();
}

#[test_case]
fn checksum_rule_accepts_balanced_bytes() {
    // bytes summing to 0 mod 256
    let table = [0x10u8, 0x20, 0x30, 0xA0];
    assert!(checksum_ok(&table));

    let zeros = [0u8; 36];
    assert!(checksum_ok(&zeros));
}

#[test_case]
fn checksum_rule_rejects_corruption() {
    let mut table = [0x10u8, 0x20, 0x30, 0xA0];
    assert!(checksum_ok(&table));

    // flip one byte, the sum can no longer be zero
    table[2] = table[2].wrapping_add(1);
    assert!(!checksum_ok(&table));

    assert!(!checksum_ok(&[1u8]));
}

#[test_case]
fn every_exposed_table_passes_the_checksum_rule() {
    let Some(fadt) = ACPI.find_table(b"FACP", 0) else {
        // no ACPI on this machine, nothing to verify
        return;
    };

    assert_eq!({ fadt.signature }, *b"FACP");
    assert!(checksum_ok(fadt.bytes()));

    // the FADT alias resolves to the same table
    let alias = ACPI.find_table(b"FADT", 0).expect("the FACP alias must resolve");
    assert_eq!(alias as *const _ as usize, fadt as *const _ as usize);

    if let Some(dsdt) = ACPI.find_table(b"DSDT", 0) {
        assert_eq!({ dsdt.signature }, *b"DSDT");
        assert!(checksum_ok(dsdt.bytes()));
    }

    if let Some(apic) = ACPI.find_table(b"APIC", 0) {
        assert!(checksum_ok(apic.bytes()));
    }
}

#[test_case]
fn unknown_signatures_resolve_to_nothing() {
    assert!(ACPI.find_table(b"ZZZZ", 0).is_none());
}

#[test_case]
fn missing_occurrences_resolve_to_nothing() {
    if ACPI.find_table(b"FACP", 0).is_none() {
        return;
    }

    // firmware ships one FADT, the tenth occurrence cannot exist
    assert!(ACPI.find_table(b"APIC", 9).is_none());
}

#[test_case]
fn power_profile_is_a_known_variant() {
    // any variant is fine, the call itself must not fall over
    let profile = ACPI.power_profile();
    let _ = profile == PowerProfile::Unspecified;
}
