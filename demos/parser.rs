// udmp-walker contributors - October 19 2026
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use udmp_walker::{Reader, UserDumpParser};

/// Convert an hexadecimal string to a `u64`.
fn string_to_hex(s: &str) -> Result<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .with_context(|| format!("{s} is not an hexadecimal number"))
}

/// How the dump file gets read.
#[derive(Debug, Default, Clone, Copy, ValueEnum)]
enum ReaderKind {
    /// Memory map the file.
    #[default]
    Mmap,
    /// Read the file with regular file I/O.
    File,
}

/// Display what is in a Windows user-mode minidump.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// The dump path.
    dump_path: PathBuf,
    /// Show everything.
    #[arg(short, long)]
    all: bool,
    /// Show the loaded modules.
    #[arg(short, long)]
    modules: bool,
    /// Show the memory map.
    #[arg(long)]
    mem: bool,
    /// Show the threads, or only the one with this TID.
    #[arg(short, long, num_args = 0..=1, default_missing_value = "all")]
    threads: Option<String>,
    /// Show what was recovered from the PEB.
    #[arg(short, long)]
    peb: bool,
    /// Show the environment variables.
    #[arg(short, long)]
    env: bool,
    /// Show a summary of the dump.
    #[arg(short, long)]
    summary: bool,
    /// Dump the memory at this address.
    #[arg(short, long, value_parser = string_to_hex)]
    dump: Option<u64>,
    /// How many bytes to dump.
    #[arg(short, long, default_value_t = 0x100)]
    len: usize,
    /// How to read the dump file.
    #[arg(short, long, value_enum, default_value_t)]
    reader: ReaderKind,
}

/// Print a hexdump of data that started at `address`.
fn hexdump(address: u64, data: &[u8]) {
    for (i, row) in data.chunks(16).enumerate() {
        print!("{:016x}: ", address + (i as u64 * 16));
        for idx in 0..16 {
            match row.get(idx) {
                Some(c) => print!("{c:02x}"),
                None => print!("  "),
            }
        }

        print!(" |");
        for idx in 0..16 {
            match row.get(idx) {
                Some(c) => {
                    let c = char::from(*c);
                    print!("{}", if c.is_ascii_graphic() { c } else { '.' });
                }
                None => print!(" "),
            }
        }
        println!("|");
    }
}

fn show<R: Reader>(args: &Args, mut parser: UserDumpParser<R>) -> Result<()> {
    if args.summary || args.all {
        print!("{}", *parser);
    }

    // Do we want to display modules?
    if args.modules || args.all {
        println!("Loaded modules:");

        // Iterate through the module and display their base address and path.
        for module in &parser.modules {
            println!("{:016x}: {}", module.start_addr(), module.path);
        }
    }

    // Do we want the memory map?
    if args.mem || args.all {
        println!("Memory map:");

        let regions = parser.address_space.iter().flat_map(|space| space.regions());
        for region in regions {
            print!(
                "{:016x} {:016x} {:016x} @{:x}",
                region.start_addr(),
                region.end_addr(),
                region.len(),
                region.rva
            );

            // Do we have a module that exists at this address?
            if let Some(module) = parser.get_module(region.start_addr()) {
                print!(" [{}; \"{}\"]", module.file_name(), module.path);
            }

            println!();
        }

        if let Some(memory_info) = &parser.memory_info {
            println!("Memory info:");
            for info in memory_info {
                println!(
                    "{:016x} {:016x} state:{:x} type:{:x} protect:{:x}",
                    info.base_address, info.region_size, info.state, info.type_, info.protect
                );
            }
        }
    }

    // Do we want threads?
    if let Some(wanted) = args.threads.as_deref().or(args.all.then_some("all")) {
        println!("Threads:");

        let wanted_tid = match wanted {
            "all" => None,
            "main" => Some(
                parser
                    .foreground_tid()
                    .ok_or_else(|| anyhow!("no foreground thread id in dump"))?,
            ),
            tid => Some(tid.parse::<u32>().with_context(|| format!("{tid} is not a TID"))?),
        };

        for thread in &parser.threads {
            if matches!(wanted_tid, Some(tid) if tid != thread.id) {
                continue;
            }

            println!("TID {}, TEB {:016x}", thread.id, thread.teb);
            match thread.context() {
                Some(context) => {
                    println!("Context:");
                    println!("{context}");
                }
                None => println!("No context"),
            }
        }
    }

    // Do we want the PEB?
    if args.peb || args.all {
        match &parser.peb {
            Some(peb) => print!("{peb}"),
            None => println!("No PEB"),
        }
    }

    if args.env || args.all {
        println!("Environment:");
        for variable in parser.peb.iter().flat_map(|p| &p.environment_variables) {
            println!("  {variable}");
        }
    }

    // Do we want to dump memory?
    if let Some(address) = args.dump {
        println!("Memory:");
        let data = parser
            .read_virtual(address, args.len)
            .with_context(|| format!("failed to read memory at {address:016x}"))?;

        println!("{:016x} -> {:016x}", address, address + data.len() as u64);
        hexdump(address, &data);
    }

    for diagnostic in &parser.diagnostics {
        log::info!("{diagnostic}");
    }

    Ok(())
}

fn open(args: &Args, path: &Path) -> Result<()> {
    let context = || format!("failed to parse {}", path.display());
    match args.reader {
        ReaderKind::Mmap => show(args, UserDumpParser::new(path).with_context(context)?),
        ReaderKind::File => show(args, UserDumpParser::with_file(path).with_context(context)?),
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    open(&args, &args.dump_path)
}
