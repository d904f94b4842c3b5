// https://wiki.osdev.org/Interrupt_Descriptor_Table
pub mod gdt;
pub mod isr_stubs;
pub mod pic;
pub mod tss;

use crate::{log, serial_println};
use bitflags::bitflags;
use core::arch::asm;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use gdt::KERNEL_CODE_SELECTOR;
use lazy_static::lazy_static;
use pic::Pic;
use spin::Mutex;
use tss::FAULT_IST_INDEX;

pub const EXCEPTION_VECTOR_COUNT: usize = 32;
pub const IRQ_LINE_COUNT: usize = 16;

/// Both PICs remapped right above the cpu exceptions.
pub const PIC_MASTER_OFFSET: u8 = 0x20;
pub const PIC_SLAVE_OFFSET: u8  = 0x28;

pub static PIC: Pic = Pic::new(PIC_MASTER_OFFSET, PIC_SLAVE_OFFSET);

static EXCEPTION_NAMES: [&str; EXCEPTION_VECTOR_COUNT] = [
    "Division By Zero",
    "Debug",
    "Non Maskable Interrupt",
    "Breakpoint",
    "Overflow",
    "Bound Range Exceeded",
    "Invalid Opcode",
    "Device Not Available",
    "Double Fault",
    "Coprocessor Segment Overrun",
    "Invalid TSS",
    "Segment Not Present",
    "Stack Segment Fault",
    "General Protection Fault",
    "Page Fault",
    "Reserved (15)",
    "x87 Floating Point Error",
    "Alignment Check",
    "Machine Check",
    "SIMD Floating Point Exception",
    "Virtualization Exception",
    "Control Protection Exception",
    "Reserved (22)",
    "Reserved (23)",
    "Reserved (24)",
    "Reserved (25)",
    "Reserved (26)",
    "Reserved (27)",
    "Hypervisor Injection Exception",
    "VMM Communication Exception",
    "Security Exception",
    "Reserved (31)",
];

/// The general purpose registers exactly as the common stub pushed them.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SavedRegisters {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
}

/// What the cpu pushed on interrupt entry.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InterruptStackFrame {
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// The full state a handler may look at: saved registers, the vector, the
/// error code (synthesized as zero where the cpu pushes none) and the iret
/// frame.
#[repr(C)]
#[derive(Debug)]
pub struct InterruptContext {
    pub regs: SavedRegisters,
    pub vector: u64,
    pub error_code: u64,
    pub frame: InterruptStackFrame,
}

pub type InterruptHandlerFn = fn(&mut InterruptContext);

/// Per-line binding for the 16 legacy IRQs. The `present` flag and the PIC
/// mask bit move together: registering unmasks, clearing masks.
#[derive(Clone, Copy)]
struct IrqBinding {
    handler: Option<InterruptHandlerFn>,
}

static EXCEPTION_HANDLERS: Mutex<[Option<InterruptHandlerFn>; EXCEPTION_VECTOR_COUNT]> =
    Mutex::new([None; EXCEPTION_VECTOR_COUNT]);

static IRQ_BINDINGS: Mutex<[IrqBinding; IRQ_LINE_COUNT]> =
    Mutex::new([IrqBinding { handler: None }; IRQ_LINE_COUNT]);

/// While set, an exception with no registered handler is logged instead of
/// entering the panic path. Only the IDT self test uses this and it must be
/// clear before external interrupts are enabled.
static SELF_TEST_MODE: AtomicBool = AtomicBool::new(false);

/// Bit per vector, set when the dispatcher sees that vector in self test mode.
static SELF_TEST_HITS: AtomicU64 = AtomicU64::new(0);

bitflags! {
    #[derive(Clone, Copy)]
    struct TypeAttributes: u8 {
        const GATE_TYPE_INTERRUPT = 0xE;
        const GATE_TYPE_TRAP      = 0xF;
        const DPL                 = 0b0110_0000; // Descriptor Privilege Level
        const PRESENT             = 0b1000_0000;
    }
}

// this represents an entry on the IDT
// https://wiki.osdev.org/Interrupt_Descriptor_Table#Gate_Descriptor_2
#[repr(C)]
#[derive(Clone, Copy)]
struct InterruptDescriptor {
    offset_1: u16,              // offset bits 0..15
    selector: u16,              // a code segment selector in the GDT
    ist: u8,                    // bits 0..2 hold the Interrupt Stack Table index, rest of bits zero
    type_attrs: u8,             // gate type, dpl, and present fields
    offset_2: u16,              // offset bits 16..31
    offset_3: u32,              // offset bits 32..63
    zero: u32,                  // reserved
}

impl InterruptDescriptor {
    const fn missing() -> Self {
        InterruptDescriptor {
            offset_1: 0,
            selector: 0,
            ist: 0,
            type_attrs: 0,
            offset_2: 0,
            offset_3: 0,
            zero: 0,
        }
    }

    fn new(handler_addr: usize, ist: u8) -> Self {
        InterruptDescriptor {
            offset_1: handler_addr as u16,
            selector: KERNEL_CODE_SELECTOR,
            ist,
            type_attrs: (TypeAttributes::PRESENT | TypeAttributes::GATE_TYPE_INTERRUPT).bits(),
            offset_2: (handler_addr >> 16) as u16,
            offset_3: (handler_addr >> 32) as u32,
            zero: 0,
        }
    }
}

#[repr(C, align(16))]
struct InterruptDescriptorTable {
    entries: [InterruptDescriptor; 256],
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u64,
}

impl InterruptDescriptorTable {
    /// Builds all 256 gates from the asm stub table. Exceptions and IRQs are
    /// told apart later by the dispatcher; the faults that must survive a
    /// broken stack get the IST1 fault stack.
    fn new() -> Self {
        let mut idt = InterruptDescriptorTable {
            entries: [InterruptDescriptor::missing(); 256],
        };

        for vector in 0..256 {
            let stub = unsafe { isr_stubs::ISR_STUB_TABLE[vector] };
            idt.entries[vector] = InterruptDescriptor::new(stub, 0);
        }

        // double fault, general protection fault and page fault run on the
        // dedicated fault stack
        for vector in [8, 13, 14] {
            let stub = unsafe { isr_stubs::ISR_STUB_TABLE[vector] };
            idt.entries[vector] = InterruptDescriptor::new(stub, FAULT_IST_INDEX);
        }

        idt
    }

    // only ever called on the static table, so the pointer stays valid
    fn load(&self) {
        let pointer = IdtPointer {
            limit: (size_of::<[InterruptDescriptor; 256]>() - 1) as u16,
            base: self.entries.as_ptr() as u64,
        };

        unsafe {
            asm!("lidt [{}]", in(reg) &pointer as *const IdtPointer, options(nostack, preserves_flags));
        }
    }
}

lazy_static! {
    static ref IDT: InterruptDescriptorTable = InterruptDescriptorTable::new();
}

/// Remaps and masks the PICs, loads the IDT and runs the dispatch self test.
/// External interrupts stay disabled until `enable_interrupts()`; every IRQ
/// line stays masked until something registers for it.
///
/// # Safety
///
/// Must run after `gdt::init()` (the gates reference the kernel code
/// selector and the fault stack IST slot).
pub unsafe fn init() {
    disable_interrupts();

    PIC.init();
    IDT.load();

    self_test();
}

/// Raises a few software interrupts against the freshly loaded table and
/// checks that the dispatcher saw exactly them.
fn self_test() {
    SELF_TEST_HITS.store(0, Ordering::SeqCst);
    SELF_TEST_MODE.store(true, Ordering::SeqCst);

    unsafe {
        asm!("int 0");
        asm!("int 3");
    }

    SELF_TEST_MODE.store(false, Ordering::SeqCst);

    let hits = SELF_TEST_HITS.load(Ordering::SeqCst);
    assert!(hits & (1 << 0) != 0, "dispatch self test never saw vector 0");
    assert!(hits & (1 << 3) != 0, "dispatch self test never saw vector 3");

    log!(ok, "Interrupt dispatch self test passed.");
}

/// Whether the dispatcher is in self test mode right now.
pub fn self_test_active() -> bool {
    SELF_TEST_MODE.load(Ordering::SeqCst)
}

/// Runs `f` with the self test flag raised. Test images use this to raise
/// software interrupts without tripping the panic path.
pub fn with_self_test_mode<R>(f: impl FnOnce() -> R) -> R {
    SELF_TEST_HITS.store(0, Ordering::SeqCst);
    SELF_TEST_MODE.store(true, Ordering::SeqCst);
    let result = f();
    SELF_TEST_MODE.store(false, Ordering::SeqCst);
    result
}

/// Vectors observed by the dispatcher during the last self test window.
pub fn self_test_hits() -> u64 {
    SELF_TEST_HITS.load(Ordering::SeqCst)
}

/// Registers `handler` for exception `vector`.
///
/// # Panics
///
/// If `vector` is not an exception vector or already has a handler.
pub fn register_exception(vector: u8, handler: InterruptHandlerFn) {
    assert!((vector as usize) < EXCEPTION_VECTOR_COUNT, "vector {} is not a cpu exception", vector);

    without_interrupts(|| {
        let handlers = &mut *EXCEPTION_HANDLERS.lock();
        assert!(handlers[vector as usize].is_none(), "exception vector {} already has a handler", vector);
        handlers[vector as usize] = Some(handler);
    });
}

/// Removes the handler for exception `vector`.
pub fn clear_exception(vector: u8) {
    assert!((vector as usize) < EXCEPTION_VECTOR_COUNT, "vector {} is not a cpu exception", vector);

    without_interrupts(|| {
        EXCEPTION_HANDLERS.lock()[vector as usize] = None;
    });
}

/// Registers `handler` for IRQ `line` and unmasks the line on the PIC.
///
/// # Panics
///
/// If `line` is out of range or already has a handler.
pub fn register_irq(line: u8, handler: InterruptHandlerFn) {
    assert!((line as usize) < IRQ_LINE_COUNT, "irq line {} does not exist", line);

    without_interrupts(|| {
        let bindings = &mut *IRQ_BINDINGS.lock();
        assert!(bindings[line as usize].handler.is_none(), "irq line {} already has a handler", line);
        bindings[line as usize].handler = Some(handler);
    });

    PIC.clear_irq_mask(line);
}

/// Unmasks `line` on the PIC without touching the binding table. Drivers
/// that mask their own line mid-operation re-open it through this.
pub fn clear_irq_mask(line: u8) {
    assert!((line as usize) < IRQ_LINE_COUNT, "irq line {} does not exist", line);
    PIC.clear_irq_mask(line);
}

/// Removes the handler for IRQ `line` and masks the line again.
pub fn clear_irq(line: u8) {
    assert!((line as usize) < IRQ_LINE_COUNT, "irq line {} does not exist", line);

    PIC.set_irq_mask(line);

    without_interrupts(|| {
        IRQ_BINDINGS.lock()[line as usize].handler = None;
    });
}

/// The Rust side of every interrupt. Called by the common asm stub with the
/// saved context; runs to completion and returns into the iret path.
#[no_mangle]
extern "C" fn interrupt_dispatch(context: &mut InterruptContext) {
    let vector = context.vector;

    if vector < EXCEPTION_VECTOR_COUNT as u64 {
        dispatch_exception(context);
        return;
    }

    let master = PIC.master_offset() as u64;
    let slave = PIC.slave_offset() as u64;
    if (master..master + 8).contains(&vector) || (slave..slave + 8).contains(&vector) {
        dispatch_irq(context);
        return;
    }

    // present, but nothing should ever point here
    serial_println!("unhandled interrupt vector {} (error code {:#x})", vector, context.error_code);
}

fn dispatch_exception(context: &mut InterruptContext) {
    let vector = context.vector as usize;

    if SELF_TEST_MODE.load(Ordering::SeqCst) {
        SELF_TEST_HITS.fetch_or(1 << vector, Ordering::SeqCst);
    }

    let handler = EXCEPTION_HANDLERS.lock()[vector];
    if let Some(handler) = handler {
        handler(context);
        return;
    }

    if SELF_TEST_MODE.load(Ordering::SeqCst) {
        serial_println!("self test: exception {} ({})", vector, EXCEPTION_NAMES[vector]);
        return;
    }

    // no handler: dump everything we know and die; the fault may have hit
    // while an output lock was held and this path never returns there
    unsafe {
        crate::serial::SERIAL_PORT.force_unlock();
        crate::graphics::console::CONSOLE.force_unlock();
    }

    log!(failed, "CPU Exception: {} (vector {}, error code {:#x})", EXCEPTION_NAMES[vector], vector, context.error_code);

    if vector == 14 {
        let cr2: u64;
        unsafe { asm!("mov {}, cr2", out(reg) cr2, options(nostack, preserves_flags)) };
        log!(failed, "Page fault address: {:#x}", cr2);
    }

    let regs = &context.regs;
    let frame = &context.frame;
    log!(failed, "RIP: {:#018x}  CS: {:#06x}  RFLAGS: {:#018x}", frame.rip, frame.cs, frame.rflags);
    log!(failed, "RAX: {:#018x} RBX: {:#018x} RCX: {:#018x}", regs.rax, regs.rbx, regs.rcx);
    log!(failed, "RDX: {:#018x} RSI: {:#018x} RDI: {:#018x}", regs.rdx, regs.rsi, regs.rdi);
    log!(failed, "RBP: {:#018x} RSP: {:#018x} R8:  {:#018x}", regs.rbp, frame.rsp, regs.r8);
    log!(failed, "R9:  {:#018x} R10: {:#018x} R11: {:#018x}", regs.r9, regs.r10, regs.r11);
    log!(failed, "R12: {:#018x} R13: {:#018x} R14: {:#018x}", regs.r12, regs.r13, regs.r14);
    log!(failed, "R15: {:#018x}", regs.r15);

    panic!("unhandled cpu exception {}", vector);
}

fn dispatch_irq(context: &mut InterruptContext) {
    let vector = context.vector as u8;
    let line = if vector >= PIC.slave_offset() {
        vector - PIC.slave_offset() + 8
    } else {
        vector - PIC.master_offset()
    };

    if PIC.is_spurious(line) {
        PIC.handle_spurious(line);
        return;
    }

    let handler = IRQ_BINDINGS.lock()[line as usize].handler;
    match handler {
        Some(handler) => handler(context),
        // unclaimed lines are masked, but log it if one fires anyway
        None => serial_println!("unhandled irq on line {}", line),
    }

    PIC.send_eoi(line);
}

pub fn enable_interrupts() {
    unsafe {
        asm!("sti", options(nostack, nomem));
    }
}

pub fn disable_interrupts() {
    unsafe {
        asm!("cli", options(nostack, nomem));
    }
}

pub fn interrupts_enabled() -> bool {
    let rflags: u64;
    unsafe {
        asm!("pushfq", "pop {}", out(reg) rflags, options(nomem, preserves_flags));
    }
    rflags & (1 << 9) != 0
}

/// Runs `f` with interrupts disabled, restoring the previous state after.
///
/// Every foreground read-modify-write of state shared with an interrupt
/// handler goes through here.
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    let were_enabled = interrupts_enabled();

    if were_enabled {
        disable_interrupts();
    }

    let result = f();

    if were_enabled {
        enable_interrupts();
    }

    result
}
