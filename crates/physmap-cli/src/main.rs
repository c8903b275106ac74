// `physmap` maps physical memory through `mmap(2)`, which only exists on unix hosts. Other targets
// get a stub so `cargo build --workspace` keeps working there.
#[cfg(not(unix))]
fn main() {
    eprintln!("physmap requires a unix host");
    std::process::exit(1);
}

#[cfg(unix)]
fn main() -> anyhow::Result<()> {
    native::main()
}

#[cfg(unix)]
mod native {
    use std::path::PathBuf;

    use anyhow::{bail, Context, Result};
    use clap::{Parser, Subcommand};
    use physmap::{DevMem, DevMemConfig, MappedRegister, Width};

    const DUMP_LINE: usize = 16;

    #[derive(Debug, Parser)]
    #[command(
        name = "physmap",
        about = "Read and write memory-mapped hardware registers",
        after_help = "The device defaults to $PHYSMAP_DEVICE, then /dev/mem. \
                      Set PHYSMAP_SYNC=0 to open it without O_SYNC. Logging follows RUST_LOG."
    )]
    pub struct Args {
        /// Physical memory device to map (e.g. /dev/gpiomem).
        #[arg(long, global = true)]
        device: Option<PathBuf>,

        /// Open the device without O_SYNC.
        #[arg(long, global = true)]
        no_sync: bool,

        #[command(subcommand)]
        command: Command,
    }

    #[derive(Debug, Subcommand)]
    enum Command {
        /// Read a single register.
        Read {
            /// Physical base address.
            #[arg(value_parser = parse_u64)]
            base: u64,

            /// Byte offset of the register from BASE.
            #[arg(long, default_value = "0", value_parser = parse_usize)]
            offset: usize,

            /// Access width in bits (8, 16, 32 or 64).
            #[arg(long, default_value = "32", value_parser = parse_width)]
            width: Width,
        },

        /// Write a single register.
        Write {
            /// Physical base address.
            #[arg(value_parser = parse_u64)]
            base: u64,

            /// Value to store; must fit in the access width.
            #[arg(value_parser = parse_u64)]
            value: u64,

            /// Byte offset of the register from BASE.
            #[arg(long, default_value = "0", value_parser = parse_usize)]
            offset: usize,

            /// Access width in bits (8, 16, 32 or 64).
            #[arg(long, default_value = "32", value_parser = parse_width)]
            width: Width,
        },

        /// Hex-dump a range of physical memory.
        Dump {
            #[arg(value_parser = parse_u64)]
            base: u64,

            #[arg(value_parser = parse_usize)]
            len: usize,
        },

        /// Map a range and describe it.
        Info {
            #[arg(value_parser = parse_u64)]
            base: u64,

            #[arg(value_parser = parse_usize)]
            size: usize,

            /// Number of bytes to include in the preview.
            #[arg(long, default_value = "16", value_parser = parse_usize)]
            preview: usize,
        },
    }

    fn parse_u64(raw: &str) -> Result<u64, String> {
        let cleaned = raw.trim().replace('_', "");
        let parsed = match cleaned
            .strip_prefix("0x")
            .or_else(|| cleaned.strip_prefix("0X"))
        {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => cleaned.parse::<u64>(),
        };
        parsed.map_err(|e| format!("invalid number {raw:?}: {e}"))
    }

    fn parse_usize(raw: &str) -> Result<usize, String> {
        let value = parse_u64(raw)?;
        usize::try_from(value).map_err(|_| format!("{raw:?} does not fit in usize"))
    }

    fn parse_width(raw: &str) -> Result<Width, String> {
        raw.trim()
            .parse::<u32>()
            .ok()
            .and_then(Width::from_bits)
            .ok_or_else(|| format!("invalid width {raw:?} (expected 8, 16, 32 or 64)"))
    }

    fn open(config: &DevMemConfig, base: u64, size: usize) -> Result<MappedRegister<DevMem>> {
        MappedRegister::open_with(DevMem::new(config.clone()), base, size).with_context(|| {
            format!(
                "failed to map 0x{size:x} bytes at 0x{base:x} via {}",
                config.path.display()
            )
        })
    }

    fn span(offset: usize, width: Width) -> Result<usize> {
        offset
            .checked_add(width.bytes())
            .context("offset overflows the address space")
    }

    pub fn main() -> Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();

        let args = Args::parse();

        let mut config = DevMemConfig::from_env()?;
        if let Some(device) = args.device {
            config.path = device;
        }
        if args.no_sync {
            config.sync = false;
        }
        tracing::debug!(?config, "resolved device config");

        match args.command {
            Command::Read {
                base,
                offset,
                width,
            } => {
                let mut reg = open(&config, base, span(offset, width)?)?;
                let value = match width {
                    Width::U8 => u64::from(reg.read8(offset)?),
                    Width::U16 => u64::from(reg.read16(offset)?),
                    Width::U32 => u64::from(reg.read32(offset)?),
                    Width::U64 => reg.read64(offset)?,
                };
                let digits = width.bytes() * 2;
                println!("0x{value:0digits$x}");
            }
            Command::Write {
                base,
                value,
                offset,
                width,
            } => {
                if value & !width.mask() != 0 {
                    bail!(
                        "value 0x{value:x} does not fit in {} bits",
                        width.bytes() * 8
                    );
                }
                let mut reg = open(&config, base, span(offset, width)?)?;
                // The mask check above makes these narrowing casts lossless.
                match width {
                    Width::U8 => reg.write8(offset, value as u8)?,
                    Width::U16 => reg.write16(offset, value as u16)?,
                    Width::U32 => reg.write32(offset, value as u32)?,
                    Width::U64 => reg.write64(offset, value)?,
                }
                tracing::info!("wrote 0x{value:x} to 0x{base:x}+0x{offset:x}");
            }
            Command::Dump { base, len } => {
                if len == 0 {
                    return Ok(());
                }
                let mut reg = open(&config, base, len)?;
                let bytes = reg.read(0, len)?;
                for (i, line) in bytes.chunks(DUMP_LINE).enumerate() {
                    let addr = base + (i * DUMP_LINE) as u64;
                    let hex: Vec<String> = line.iter().map(|b| format!("{b:02x}")).collect();
                    println!("0x{addr:08x}: {}", hex.join(" "));
                }
            }
            Command::Info {
                base,
                size,
                preview,
            } => {
                let mut reg = open(&config, base, size)?;
                println!("{}", reg.describe(preview));
            }
        }

        Ok(())
    }
}
