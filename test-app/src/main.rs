// rigport test application -- CLI tool for exercising a serial rig port and
// the example drivers against real hardware or a scripted mock port.
//
// Usage:
//   rigport-test-app ports
//   rigport-test-app --rig kenwood --port /dev/ttyUSB0 --baud 38400 freq get
//   rigport-test-app --rig icom --civ-addr 0x94 --port /dev/ttyUSB0 freq set 14074000
//   rigport-test-app --rig ft890 --config ft890.toml ptt on --hold-ms 500
//   rigport-test-app --rig kenwood --ptt-line rts --port /dev/ttyUSB0 ptt on
//   rigport-test-app --rig kenwood --port /dev/ttyUSB0 send "IF;"
//   rigport-test-app --rig icom --port /dev/ttyUSB0 send --hex "FE FE 94 E0 03 FD"
//   rigport-test-app --rig kenwood --mock freq get
//
// Set RUST_LOG=debug (or pass -v) to see every byte written and read.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use rigport::icom::{self, IcomRig};
use rigport::io::{CommandEngine, spawn_worker};
use rigport::kenwood::{self, KenwoodRig};
use rigport::yaesu::{self, Ft890Rig};
use rigport::trace::render;
use rigport::{
    BaudRate, CommandFrame, ControlLine, Encoding, Expect, FrameDialect, FrequencyControl,
    LineConfig, ModeControl, PortConfig, PortHandle, PttControl, PttMethod, RigIo, Vfo,
};
use rigport_test_harness::{MockOpener, MockPort};

// ---------------------------------------------------------------------------
// Driver selection
// ---------------------------------------------------------------------------

/// Capability set the CLI drives.
trait Rig: FrequencyControl + ModeControl + PttControl {}

impl<T: FrequencyControl + ModeControl + PttControl> Rig for T {}

enum AnyRig {
    Kenwood(KenwoodRig),
    Icom(IcomRig),
    Ft890(Ft890Rig),
}

impl AnyRig {
    fn as_rig(&self) -> &dyn Rig {
        match self {
            AnyRig::Kenwood(r) => r,
            AnyRig::Icom(r) => r,
            AnyRig::Ft890(r) => r,
        }
    }

    /// Stop the worker and close the port.
    async fn close(self) -> rigport::Result<PortHandle> {
        match self {
            AnyRig::Kenwood(r) => r.shutdown().await,
            AnyRig::Icom(r) => r.shutdown().await,
            AnyRig::Ft890(r) => r.shutdown().await,
        }
    }
}

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// rigport test application -- exercises a rig port from the command line.
#[derive(Parser)]
#[command(name = "rigport-test-app", version, about)]
struct Cli {
    /// Protocol family of the connected rig.
    #[arg(long, value_enum, default_value = "kenwood")]
    rig: RigKind,

    /// Port configuration file (TOML). Overrides the defaults for --rig.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial port path (e.g. /dev/ttyUSB0, COM3).
    #[arg(long)]
    port: Option<String>,

    /// Baud rate.
    #[arg(long)]
    baud: Option<u32>,

    /// Key the transmitter with this control line instead of a CAT command.
    #[arg(long)]
    ptt_line: Option<ControlLine>,

    /// Per-attempt reply timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Total attempts per command.
    #[arg(long)]
    retries: Option<u32>,

    /// CI-V address of the rig (hex, e.g. 0x94). Icom only.
    #[arg(long, value_parser = parse_hex_u8, default_value = "0x94")]
    civ_addr: u8,

    /// Use a scripted mock port instead of a real serial port.
    #[arg(long)]
    mock: bool,

    /// Log every byte written and read.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum RigKind {
    /// Kenwood/Elecraft `;`-terminated ASCII.
    Kenwood,
    /// Icom CI-V.
    Icom,
    /// Yaesu FT-890 binary CAT.
    Ft890,
}

/// Parse a hex string like "0x94" or "94" into a u8.
fn parse_hex_u8(s: &str) -> std::result::Result<u8, String> {
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u8::from_str_radix(s, 16).map_err(|e| format!("invalid hex byte: {e}"))
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports on this machine.
    Ports,

    /// Send a raw command and print the reply.
    Send {
        /// Command text (e.g. "FA;"), or hex bytes with --hex.
        command: String,

        /// Interpret the command as space-separated hex bytes.
        #[arg(long)]
        hex: bool,

        /// Reply is complete at this many bytes.
        #[arg(long)]
        len: Option<usize>,

        /// Reply is complete when it ends with this text (default: the
        /// dialect's terminator).
        #[arg(long)]
        terminator: Option<String>,

        /// Do not wait for a reply.
        #[arg(long)]
        no_reply: bool,
    },

    /// Frequency operations.
    Freq {
        #[command(subcommand)]
        action: FreqAction,
    },

    /// Mode operations.
    Mode {
        #[command(subcommand)]
        action: ModeAction,
    },

    /// PTT operations.
    Ptt {
        #[command(subcommand)]
        action: PttAction,
    },
}

#[derive(Subcommand)]
enum FreqAction {
    /// Read the frequency of a VFO.
    Get {
        #[arg(long, value_enum, default_value = "a")]
        vfo: VfoArg,
    },
    /// Tune a VFO.
    Set {
        /// Frequency in hertz (e.g. 14074000).
        freq_hz: u64,
        #[arg(long, value_enum, default_value = "a")]
        vfo: VfoArg,
    },
}

#[derive(Subcommand)]
enum ModeAction {
    /// Read the mode of a VFO.
    Get {
        #[arg(long, value_enum, default_value = "a")]
        vfo: VfoArg,
    },
    /// Select a mode (USB, LSB, CW, CWR, AM, FM, RTTY, RTTYR).
    Set {
        mode: String,
        #[arg(long, value_enum, default_value = "a")]
        vfo: VfoArg,
    },
}

#[derive(Subcommand)]
enum PttAction {
    /// Read the transmit state.
    Get,
    /// Key the transmitter.
    On {
        /// Unkey again after this many milliseconds.
        #[arg(long)]
        hold_ms: Option<u64>,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
    /// Unkey the transmitter.
    Off,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum VfoArg {
    A,
    B,
}

impl From<VfoArg> for Vfo {
    fn from(v: VfoArg) -> Self {
        match v {
            VfoArg::A => Vfo::A,
            VfoArg::B => Vfo::B,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Format a frequency in Hz as a human-readable MHz string.
fn format_freq(hz: u64) -> String {
    let mhz = hz as f64 / 1_000_000.0;
    format!("{mhz:.6} MHz")
}

/// Prompt the user for y/N confirmation. Returns true only if "y" or "Y" entered.
fn confirm(prompt: &str) -> bool {
    print!("{prompt}");
    io::stdout().flush().ok();
    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        return false;
    }
    matches!(input.trim(), "y" | "Y")
}

fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    s.split_whitespace()
        .map(|b| parse_hex_u8(b).map_err(anyhow::Error::msg))
        .collect()
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

// ---------------------------------------------------------------------------
// Port setup
// ---------------------------------------------------------------------------

fn dialect(kind: RigKind) -> Arc<dyn FrameDialect> {
    match kind {
        RigKind::Kenwood => kenwood::dialect(),
        RigKind::Icom => icom::dialect(),
        RigKind::Ft890 => yaesu::dialect(),
    }
}

/// Build the port configuration from --config or the command-line options.
fn port_config(cli: &Cli) -> Result<PortConfig> {
    let mut config = if let Some(path) = &cli.config {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        PortConfig::from_toml_str(&text).with_context(|| format!("parsing {}", path.display()))?
    } else {
        let device = match (&cli.port, cli.mock) {
            (Some(port), _) => port.clone(),
            (None, true) => "mock".to_string(),
            (None, false) => bail!("--port or --config is required (or use --mock)"),
        };
        match cli.rig {
            RigKind::Ft890 => yaesu::port_config(&device),
            _ => PortConfig::new(&device),
        }
    };

    if let Some(port) = &cli.port {
        config.device = port.clone();
    }
    if let Some(baud) = cli.baud {
        config = config.baud_rate(BaudRate::try_from(baud)?);
    }
    if let Some(ms) = cli.timeout_ms {
        config = config.read_timeout(Duration::from_millis(ms));
    }
    if let Some(n) = cli.retries {
        config = config.retries(n);
    }
    match cli.ptt_line {
        Some(ControlLine::Rts) => config = config.rts(LineConfig::ptt(false)),
        Some(ControlLine::Dtr) => config = config.dtr(LineConfig::ptt(false)),
        None => {}
    }
    config.validate()?;
    Ok(config)
}

/// Open the port and start the worker.
async fn connect(cli: &Cli) -> Result<RigIo> {
    let config = port_config(cli)?;
    let dialect = dialect(cli.rig);
    debug!(
        device = %config.device,
        baud = %config.baud_rate,
        dialect = dialect.name(),
        mock = cli.mock,
        "connecting"
    );

    if cli.mock {
        let mock = MockPort::new();
        script_mock(&mock, cli);
        let handle = PortHandle::attach(Box::new(mock.clone()), config).await?;
        return Ok(spawn_worker(
            handle,
            CommandEngine::new(dialect),
            Arc::new(MockOpener::new(mock)),
        ));
    }

    let device = config.device.clone();
    rigport::connect(config, dialect)
        .await
        .with_context(|| format!("opening {device}"))
}

fn make_rig(cli: &Cli, io: RigIo) -> AnyRig {
    let ptt = if cli.ptt_line.is_some() {
        PttMethod::Line
    } else {
        PttMethod::Cat
    };
    match cli.rig {
        RigKind::Kenwood => AnyRig::Kenwood(KenwoodRig::new(io).ptt_method(ptt)),
        RigKind::Icom => AnyRig::Icom(IcomRig::new(io, cli.civ_addr).ptt_method(ptt)),
        RigKind::Ft890 => AnyRig::Ft890(Ft890Rig::new(io).ptt_method(ptt)),
    }
}

// ---------------------------------------------------------------------------
// Mock rig
// ---------------------------------------------------------------------------

/// FT-890 status record: 14.070 MHz USB.
const FT890_VFO: [u8; 9] = [0x00, 0x15, 0x78, 0x18, 0x00, 0x00, 0x40, 0x00, 0x00];

/// A CI-V frame from the rig at `addr` to the controller.
fn icom_reply(addr: u8, body: &[u8]) -> Vec<u8> {
    let mut f = vec![0xFE, 0xFE, 0xE0, addr];
    f.extend_from_slice(body);
    f.push(0xFD);
    f
}

/// Script the replies a rig sitting on 14.070 MHz USB in receive gives to
/// the command about to run. Commands with no reply are accepted silently.
fn script_mock(mock: &MockPort, cli: &Cli) {
    match cli.rig {
        RigKind::Kenwood => script_kenwood(mock, &cli.command),
        RigKind::Icom => script_icom(mock, cli.civ_addr, &cli.command),
        RigKind::Ft890 => script_ft890(mock, &cli.command),
    }
}

fn script_kenwood(mock: &MockPort, command: &Command) {
    match command {
        Command::Send { .. } => mock.set_echo(true),
        Command::Freq {
            action: FreqAction::Get { vfo },
        } => {
            let prefix = match Vfo::from(*vfo) {
                Vfo::A => "FA",
                Vfo::B => "FB",
            };
            mock.expect(
                format!("{prefix};").as_bytes(),
                format!("{prefix}00014070000;").as_bytes(),
            );
        }
        Command::Mode {
            action: ModeAction::Get { vfo },
        } => match Vfo::from(*vfo) {
            Vfo::A => mock.expect(b"MD;", b"MD2;"),
            Vfo::B => mock.expect(b"MD$;", b"MD$2;"),
        },
        Command::Ptt {
            action: PttAction::Get,
        } => mock.expect(b"TQ;", b"TQ0;"),
        _ => {}
    }
}

fn script_icom(mock: &MockPort, addr: u8, command: &Command) {
    mock.set_echo(true);
    let ack = icom_reply(addr, &[icom::ACK]);
    match command {
        Command::Freq { action } => match action {
            FreqAction::Get { vfo } => {
                let (request, header) = match Vfo::from(*vfo) {
                    Vfo::A => (icom::encode_frame(addr, 0x03, None, &[]), vec![0x03]),
                    Vfo::B => (icom::encode_frame(addr, 0x25, Some(0x01), &[]), vec![0x25, 0x01]),
                };
                let mut body = header;
                body.extend_from_slice(&icom::freq_to_bcd(14_070_000));
                mock.expect(&request, &icom_reply(addr, &body));
            }
            FreqAction::Set { freq_hz, vfo } => {
                let bcd = icom::freq_to_bcd(*freq_hz);
                let request = match Vfo::from(*vfo) {
                    Vfo::A => icom::encode_frame(addr, 0x05, None, &bcd),
                    Vfo::B => icom::encode_frame(addr, 0x25, Some(0x01), &bcd),
                };
                mock.expect(&request, &ack);
            }
        },
        Command::Mode {
            action: ModeAction::Get { .. },
        } => mock.expect(
            &icom::encode_frame(addr, 0x04, None, &[]),
            &icom_reply(addr, &[0x04, 0x01, 0x01]),
        ),
        Command::Mode {
            action: ModeAction::Set { mode, .. },
        } => {
            if let Some(code) = mode.parse().ok().and_then(icom::mode_code) {
                mock.expect(&icom::encode_frame(addr, 0x06, None, &[code, 0x01]), &ack);
            }
        }
        Command::Ptt { action } => match action {
            PttAction::Get => mock.expect(
                &icom::encode_frame(addr, 0x1C, Some(0x00), &[]),
                &icom_reply(addr, &[0x1C, 0x00, 0x00]),
            ),
            PttAction::On { hold_ms, .. } => {
                mock.expect(&icom::encode_frame(addr, 0x1C, Some(0x00), &[0x01]), &ack);
                if hold_ms.is_some() {
                    mock.expect(&icom::encode_frame(addr, 0x1C, Some(0x00), &[0x00]), &ack);
                }
            }
            PttAction::Off => {
                mock.expect(&icom::encode_frame(addr, 0x1C, Some(0x00), &[0x00]), &ack)
            }
        },
        _ => {}
    }
}

fn script_ft890(mock: &MockPort, command: &Command) {
    let mut status = FT890_VFO.to_vec();
    status.extend_from_slice(&FT890_VFO);
    match command {
        Command::Send { .. } => mock.set_echo(true),
        Command::Freq {
            action: FreqAction::Get { .. },
        }
        | Command::Mode {
            action: ModeAction::Get { .. },
        } => mock.expect(&[0x00, 0x00, 0x00, 0x03, 0x10], &status),
        Command::Ptt {
            action: PttAction::Get,
        } => mock.expect(&[0x00, 0x00, 0x00, 0x00, 0xFA], &[0x00; 5]),
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

fn cmd_ports() -> Result<()> {
    let ports = rigport::transport::list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found.");
        return Ok(());
    }
    for p in ports {
        match p.description {
            Some(desc) => println!("{:<24} {desc}", p.name),
            None => println!("{}", p.name),
        }
    }
    Ok(())
}

async fn cmd_send(
    io: &RigIo,
    kind: RigKind,
    command: &str,
    hex: bool,
    len: Option<usize>,
    terminator: Option<&str>,
    no_reply: bool,
) -> Result<()> {
    let frame = if hex {
        CommandFrame::binary(parse_hex_bytes(command)?)
    } else {
        CommandFrame::ascii(command)
    };

    let expect = if no_reply {
        Expect::none()
    } else {
        let mut expect = match terminator {
            Some(t) => Expect::terminator(t.as_bytes()),
            None => dialect(kind).reply_expect(),
        };
        if let Some(n) = len {
            expect = expect.with_len(n);
        }
        expect
    };

    let reply = io.execute(frame, expect).await?;
    if no_reply {
        println!("sent");
        return Ok(());
    }
    let encoding = if hex { Encoding::Hex } else { Encoding::detect(reply.as_bytes()) };
    println!(
        "{} ({} bytes, attempt {})",
        render(encoding, reply.as_bytes()),
        reply.len(),
        reply.attempt
    );
    Ok(())
}

async fn cmd_freq_get(rig: &dyn Rig, vfo: Vfo) -> Result<()> {
    let freq = rig.get_frequency(vfo).await?;
    println!("{vfo}: {}", format_freq(freq));
    Ok(())
}

async fn cmd_freq_set(rig: &dyn Rig, vfo: Vfo, freq_hz: u64) -> Result<()> {
    rig.set_frequency(vfo, freq_hz).await?;
    println!("{vfo}: set to {}", format_freq(freq_hz));
    Ok(())
}

async fn cmd_mode_get(rig: &dyn Rig, vfo: Vfo) -> Result<()> {
    let mode = rig.get_mode(vfo).await?;
    println!("{vfo}: {mode}");
    Ok(())
}

async fn cmd_mode_set(rig: &dyn Rig, vfo: Vfo, mode_str: &str) -> Result<()> {
    let mode: rigport::Mode = mode_str.parse()?;
    rig.set_mode(vfo, mode).await?;
    println!("{vfo}: mode set to {mode}");
    Ok(())
}

async fn cmd_ptt_get(rig: &dyn Rig) -> Result<()> {
    if rig.get_ptt().await? {
        println!("PTT: ON (transmitting)");
    } else {
        println!("PTT: OFF (receiving)");
    }
    Ok(())
}

async fn cmd_ptt_on(rig: &dyn Rig, hold_ms: Option<u64>, yes: bool) -> Result<()> {
    if !yes {
        println!("WARNING: This will key the transmitter.");
        println!("Ensure an antenna or dummy load is connected.");
        if !confirm("Continue? [y/N] ") {
            println!("Aborted.");
            return Ok(());
        }
    }
    rig.set_ptt(true).await?;
    println!("PTT: ON");

    if let Some(ms) = hold_ms {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        rig.set_ptt(false).await?;
        println!("PTT: OFF after {ms} ms");
    }
    Ok(())
}

async fn cmd_ptt_off(rig: &dyn Rig) -> Result<()> {
    rig.set_ptt(false).await?;
    println!("PTT: OFF");
    Ok(())
}

/// The command's own error wins over a failure to close the port.
fn finish(result: Result<()>, closed: rigport::Result<PortHandle>) -> Result<()> {
    match (result, closed) {
        (Err(e), Err(close_err)) => {
            warn!(error = %close_err, "Failed to close port");
            Err(e)
        }
        (Err(e), Ok(_)) => Err(e),
        (Ok(()), Err(close_err)) => Err(anyhow::Error::new(close_err).context("closing port")),
        (Ok(()), Ok(_)) => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // `ports` does not open anything.
    if matches!(cli.command, Command::Ports) {
        return cmd_ports();
    }

    let io = connect(&cli).await?;

    if let Command::Send {
        command,
        hex,
        len,
        terminator,
        no_reply,
    } = &cli.command
    {
        let result = cmd_send(
            &io,
            cli.rig,
            command,
            *hex,
            *len,
            terminator.as_deref(),
            *no_reply,
        )
        .await;
        return finish(result, io.shutdown().await);
    }

    let rig = make_rig(&cli, io);
    let result = match &cli.command {
        Command::Freq { action } => match action {
            FreqAction::Get { vfo } => cmd_freq_get(rig.as_rig(), (*vfo).into()).await,
            FreqAction::Set { freq_hz, vfo } => {
                cmd_freq_set(rig.as_rig(), (*vfo).into(), *freq_hz).await
            }
        },
        Command::Mode { action } => match action {
            ModeAction::Get { vfo } => cmd_mode_get(rig.as_rig(), (*vfo).into()).await,
            ModeAction::Set { mode, vfo } => cmd_mode_set(rig.as_rig(), (*vfo).into(), mode).await,
        },
        Command::Ptt { action } => match action {
            PttAction::Get => cmd_ptt_get(rig.as_rig()).await,
            PttAction::On { hold_ms, yes } => cmd_ptt_on(rig.as_rig(), *hold_ms, *yes).await,
            PttAction::Off => cmd_ptt_off(rig.as_rig()).await,
        },
        Command::Ports | Command::Send { .. } => unreachable!("handled above"),
    };

    finish(result, rig.close().await)
}
