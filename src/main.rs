use clap::{Parser, ValueEnum};
use serial_stream::config::{Config, ConfigLoader, LogFormat, LoggingConfig};
use serial_stream::{Parity, Platform, SerialStream, StopBits};
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

type CatResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser, Debug)]
#[command(
    name = "serial-cat",
    version,
    about = "Bridge a serial port to stdin/stdout.",
    long_about = "Opens a serial port in raw mode, writes everything read from stdin to the port and copies everything received from the port to stdout. Settings come from the command line, then the configuration file, then built-in defaults."
)]
struct Args {
    /// Port path, COM name or configured alias. Falls back to `serial.port` from the config file.
    port: Option<String>,

    /// Configuration file to use instead of the standard locations.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Baud rate.
    #[arg(short, long)]
    baud: Option<u32>,

    /// Data bits per byte (5-8).
    #[arg(long)]
    bytesize: Option<u8>,

    #[arg(long, value_enum)]
    parity: Option<ParityArg>,

    #[arg(long, value_enum)]
    stopbits: Option<StopBitsArg>,

    /// Enable XON/XOFF software flow control.
    #[arg(long)]
    xonxoff: bool,

    /// Enable RTS/CTS hardware flow control.
    #[arg(long)]
    rtscts: bool,

    /// Lock the port for exclusive use.
    #[arg(long)]
    exclusive: bool,

    /// Keep modem lines raised when the port is closed.
    #[arg(long)]
    no_hangup: bool,

    /// Send a break after opening the port.
    #[arg(long = "break")]
    send_break: bool,

    /// Exit once stdin is exhausted instead of waiting for Ctrl+C.
    #[arg(long)]
    exit_on_eof: bool,

    /// Backend platform (linux, darwin, bsd, cygwin, posix, windows). Defaults to the running OS.
    #[arg(long)]
    platform: Option<Platform>,

    /// Log filter, e.g. `debug` or `serial_stream=trace`.
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ParityArg {
    None,
    Even,
    Odd,
    Mark,
    Space,
}

impl From<ParityArg> for Parity {
    fn from(arg: ParityArg) -> Self {
        match arg {
            ParityArg::None => Parity::None,
            ParityArg::Even => Parity::Even,
            ParityArg::Odd => Parity::Odd,
            ParityArg::Mark => Parity::Mark,
            ParityArg::Space => Parity::Space,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StopBitsArg {
    #[value(name = "1")]
    One,
    #[value(name = "1.5")]
    OnePointFive,
    #[value(name = "2")]
    Two,
}

impl From<StopBitsArg> for StopBits {
    fn from(arg: StopBitsArg) -> Self {
        match arg {
            StopBitsArg::One => StopBits::One,
            StopBitsArg::OnePointFive => StopBits::OnePointFive,
            StopBitsArg::Two => StopBits::Two,
        }
    }
}

impl Args {
    fn apply_to(&self, config: &mut Config) {
        let serial = &mut config.serial;
        if let Some(baud) = self.baud {
            serial.baudrate = baud;
        }
        if let Some(bytesize) = self.bytesize {
            serial.bytesize = bytesize;
        }
        if let Some(parity) = self.parity {
            serial.parity = parity.into();
        }
        if let Some(stopbits) = self.stopbits {
            serial.stopbits = stopbits.into();
        }
        serial.xonxoff |= self.xonxoff;
        serial.rtscts |= self.rtscts;
        serial.exclusive |= self.exclusive;
        if self.no_hangup {
            serial.hangup = false;
        }
        if let Some(ref level) = self.log_level {
            config.logging.level = level.clone();
        }
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match logging.format {
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

/// Copy stdin to the port. Once stdin is exhausted, return or keep idling.
async fn stdin_to_port(stream: &SerialStream, exit_on_eof: bool) -> CatResult<()> {
    let mut stdin = tokio::io::stdin();
    let mut buffer = vec![0u8; 4096];
    loop {
        let n = stdin.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        stream.send_all(&buffer[..n]).await?;
    }
    debug!("stdin exhausted");
    if !exit_on_eof {
        std::future::pending::<()>().await;
    }
    Ok(())
}

/// Copy the port to stdout until the peer hangs up.
async fn port_to_stdout(stream: &SerialStream, receive_size: usize) -> CatResult<()> {
    let mut stdout = tokio::io::stdout();
    loop {
        let data = stream.receive_some(Some(receive_size)).await?;
        if data.is_empty() {
            info!("Port hung up");
            return Ok(());
        }
        stdout.write_all(&data).await?;
        stdout.flush().await?;
    }
}

async fn run(args: Args) -> CatResult<()> {
    let mut loader = match args.config {
        Some(ref path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    args.apply_to(loader.config_mut());
    let config = loader.into_config();
    config.validate()?;
    init_logging(&config.logging);

    let line = config.serial.port_configuration(args.port.as_deref())?;
    let platform = args.platform.unwrap_or_else(Platform::current);
    let stream = SerialStream::with_platform(line, platform)?;
    stream.aopen().await?;

    if args.send_break {
        stream.send_break(config.serial.break_duration()).await?;
    }

    let outcome = tokio::select! {
        result = stdin_to_port(&stream, args.exit_on_eof) => result,
        result = port_to_stdout(&stream, config.serial.receive_size) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    };

    stream.aclose().await?;
    outcome
}

// Exits explicitly: a pending stdin read would otherwise hold up runtime shutdown.
#[tokio::main]
async fn main() {
    let args = Args::parse();
    let code = match run(args).await {
        Ok(()) => 0,
        Err(e) => {
            // Logging may not be set up yet when loading the configuration fails.
            eprintln!("serial-cat: {}", e);
            1
        }
    };
    std::process::exit(code);
}
