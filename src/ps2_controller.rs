// https://wiki.osdev.org/I8042_PS/2_Controller
use crate::io_port::IoPort;
use crate::log;
use bitflags::bitflags;

const PS2_DATA_PORT: u16    = 0x60;
const PS2_STATUS_PORT: u16  = 0x64; // reads
const PS2_COMMAND_PORT: u16 = 0x64; // writes

// controller commands
const CMD_READ_CONFIG: u8    = 0x20;
const CMD_WRITE_CONFIG: u8   = 0x60;
const CMD_DISABLE_PORT_2: u8 = 0xA7;
const CMD_ENABLE_PORT_2: u8  = 0xA8;
const CMD_TEST_PORT_2: u8    = 0xA9;
const CMD_SELF_TEST: u8      = 0xAA;
const CMD_TEST_PORT_1: u8    = 0xAB;
const CMD_DISABLE_PORT_1: u8 = 0xAD;
const CMD_ENABLE_PORT_1: u8  = 0xAE;

const SELF_TEST_OK: u8 = 0x55;
const PORT_TEST_OK: u8 = 0x00;

/// How many status polls a handshake gets before it counts as absent
/// hardware rather than slow hardware.
const POLL_BUDGET: u32 = 10_000;

bitflags! {
    struct Status: u8 {
        const OUTPUT_FULL = 1 << 0; // data waiting in 0x60
        const INPUT_FULL  = 1 << 1; // controller still chewing on a write
    }
}

bitflags! {
    #[derive(Clone, Copy)]
    struct Config: u8 {
        const PORT_1_IRQ         = 1 << 0;
        const PORT_2_IRQ         = 1 << 1;
        const SYSTEM_FLAG        = 1 << 2;
        const PORT_1_CLOCK_OFF   = 1 << 4;
        const PORT_2_CLOCK_OFF   = 1 << 5;
        const PORT_1_TRANSLATION = 1 << 6;
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Ps2Error {
    /// The controller never acknowledged within the poll budget; most likely
    /// there is no PS/2 controller at all.
    Timeout,
    SelfTestFailed(u8),
    Port1TestFailed(u8),
}

/// State of the controller after bring-up, for the input drivers stacked on
/// top of the core to inspect.
#[derive(Debug, Clone, Copy)]
pub struct Ps2Controller {
    pub dual_channel: bool,
    pub port_2_usable: bool,
}

impl Ps2Controller {
    /// Brings the i8042 controller itself into a known state: devices
    /// disabled, buffers flushed, translation off, self tests run, port 1
    /// re-enabled with its interrupt line live. Device level setup (keyboard
    /// scancode sets, mouse sample rates) belongs to the drivers.
    pub fn init() -> Result<Ps2Controller, Ps2Error> {
        // nothing may talk while the controller is being reconfigured
        write_command(CMD_DISABLE_PORT_1)?;
        write_command(CMD_DISABLE_PORT_2)?;

        flush_output_buffer();

        // IRQs and scancode translation off during setup
        write_command(CMD_READ_CONFIG)?;
        let mut config = Config::from_bits_truncate(read_data()?);
        config.remove(Config::PORT_1_IRQ | Config::PORT_2_IRQ | Config::PORT_1_TRANSLATION);
        write_command(CMD_WRITE_CONFIG)?;
        write_data(config.bits())?;

        write_command(CMD_SELF_TEST)?;
        let result = read_data()?;
        if result != SELF_TEST_OK {
            return Err(Ps2Error::SelfTestFailed(result));
        }

        // some controllers reset their config during the self test
        write_command(CMD_WRITE_CONFIG)?;
        write_data(config.bits())?;

        // a dual channel controller reports port 2's clock running once the
        // port is enabled
        write_command(CMD_ENABLE_PORT_2)?;
        write_command(CMD_READ_CONFIG)?;
        let probe = Config::from_bits_truncate(read_data()?);
        let dual_channel = !probe.contains(Config::PORT_2_CLOCK_OFF);
        write_command(CMD_DISABLE_PORT_2)?;

        write_command(CMD_TEST_PORT_1)?;
        let result = read_data()?;
        if result != PORT_TEST_OK {
            return Err(Ps2Error::Port1TestFailed(result));
        }

        let port_2_usable = if dual_channel {
            write_command(CMD_TEST_PORT_2)?;
            read_data()? == PORT_TEST_OK
        } else {
            false
        };

        // bring port 1 back up with its interrupt enabled; the line itself
        // stays masked until a keyboard driver registers for IRQ 1
        write_command(CMD_ENABLE_PORT_1)?;
        config.insert(Config::PORT_1_IRQ);
        if port_2_usable {
            write_command(CMD_ENABLE_PORT_2)?;
            config.insert(Config::PORT_2_IRQ);
        }
        write_command(CMD_WRITE_CONFIG)?;
        write_data(config.bits())?;

        let controller = Ps2Controller { dual_channel, port_2_usable };
        log!(ok, "PS/2 controller up ({}).",
            if port_2_usable { "dual channel" } else { "single channel" });
        Ok(controller)
    }
}

fn status() -> Status {
    Status::from_bits_truncate(IoPort::read_u8(PS2_STATUS_PORT))
}

/// Throws away whatever stale bytes the controller buffered before boot.
fn flush_output_buffer() {
    while status().contains(Status::OUTPUT_FULL) {
        IoPort::read_u8(PS2_DATA_PORT);
    }
}

fn write_command(command: u8) -> Result<(), Ps2Error> {
    wait_input_clear()?;
    IoPort::write_u8(PS2_COMMAND_PORT, command);
    Ok(())
}

fn write_data(value: u8) -> Result<(), Ps2Error> {
    wait_input_clear()?;
    IoPort::write_u8(PS2_DATA_PORT, value);
    Ok(())
}

fn read_data() -> Result<u8, Ps2Error> {
    for _ in 0..POLL_BUDGET {
        if status().contains(Status::OUTPUT_FULL) {
            return Ok(IoPort::read_u8(PS2_DATA_PORT));
        }
        IoPort::io_wait();
    }

    Err(Ps2Error::Timeout)
}

fn wait_input_clear() -> Result<(), Ps2Error> {
    for _ in 0..POLL_BUDGET {
        if !status().contains(Status::INPUT_FULL) {
            return Ok(());
        }
        IoPort::io_wait();
    }

    Err(Ps2Error::Timeout)
}
