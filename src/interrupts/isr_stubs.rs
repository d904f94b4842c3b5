//! The per-vector interrupt service stubs.
//!
//! Every vector gets a tiny asm stub that normalizes the stack to one shape:
//! vectors without a cpu error code push a zero in its place, then every stub
//! pushes its vector number and falls into the common path, which saves the
//! caller-visible registers and calls into [`interrupt_dispatch`]. The asm
//! here is the irreducible part; everything after the `call` is Rust.
//!
//! [`interrupt_dispatch`]: super::interrupt_dispatch

use core::arch::global_asm;

// vectors where the cpu itself pushes an error code
// (8, 10-14, 17, 21, 30 per the Intel SDM)
global_asm!(
    r#"
.altmacro

.macro isr_stub_noerr vec
    .balign 8
    isr_stub_\vec:
        push 0
        push \vec
        jmp isr_common
.endm

.macro isr_stub_err vec
    .balign 8
    isr_stub_\vec:
        push \vec
        jmp isr_common
.endm

.section .text

isr_stub_noerr 0
isr_stub_noerr 1
isr_stub_noerr 2
isr_stub_noerr 3
isr_stub_noerr 4
isr_stub_noerr 5
isr_stub_noerr 6
isr_stub_noerr 7
isr_stub_err   8
isr_stub_noerr 9
isr_stub_err   10
isr_stub_err   11
isr_stub_err   12
isr_stub_err   13
isr_stub_err   14
isr_stub_noerr 15
isr_stub_noerr 16
isr_stub_err   17
isr_stub_noerr 18
isr_stub_noerr 19
isr_stub_noerr 20
isr_stub_err   21
isr_stub_noerr 22
isr_stub_noerr 23
isr_stub_noerr 24
isr_stub_noerr 25
isr_stub_noerr 26
isr_stub_noerr 27
isr_stub_noerr 28
isr_stub_noerr 29
isr_stub_err   30
isr_stub_noerr 31

// every remaining vector (IRQs included) has no cpu error code
.set vector, 32
.rept 224
    isr_stub_noerr %vector
    .set vector, vector + 1
.endr

/*
 * Common entry: the stack already holds the iret frame, the error code and
 * the vector. Save the scratch state, hand the whole context to Rust,
 * restore and return. The dispatcher receives a pointer to the saved state
 * in rdi per the SysV ABI.
 */
isr_common:
    push rax
    push rbx
    push rcx
    push rdx
    push rsi
    push rdi
    push rbp
    push r8
    push r9
    push r10
    push r11
    push r12
    push r13
    push r14
    push r15

    mov rdi, rsp
    cld
    call interrupt_dispatch

    pop r15
    pop r14
    pop r13
    pop r12
    pop r11
    pop r10
    pop r9
    pop r8
    pop rbp
    pop rdi
    pop rsi
    pop rdx
    pop rcx
    pop rbx
    pop rax

    // drop the vector and the error code
    add rsp, 16
    iretq

.macro stub_table_entry vec
    .quad isr_stub_\vec
.endm

.section .rodata
.global ISR_STUB_TABLE
.balign 8
ISR_STUB_TABLE:
.set vector, 0
.rept 256
    stub_table_entry %vector
    .set vector, vector + 1
.endr

.section .text
"#
);

extern "C" {
    /// One entry per vector, filled by the asm above.
    pub static ISR_STUB_TABLE: [usize; 256];
}
