//! VM Pager - Main Entry Point
//!
//! Usage: vm-pager [OPTIONS] <executable>...
//!
//! Loads every NOFF executable into its own address space, then touches each
//! page of each space in round-robin passes so pages fault in and get evicted
//! across spaces.
//!
//! Options:
//!   -v, --verbose        Print per-pass residency
//!   -f, --frames N       Number of physical frames
//!   -s, --slots N        Number of swap slots
//!   -p, --page-size N    Page size in bytes
//!   -d, --disk PATH      Swap to a host file instead of memory
//!   -r, --rounds N       Number of round-robin passes
//!   -h, --help           Print help information

use std::env;
use std::process;
use std::sync::Arc;

use log::info;

use vm_pager::config::MemoryConfig;
use vm_pager::io::HostFileStore;
use vm_pager::memory::{BackingStore, Disk, FileDisk};
use vm_pager::{AddressSpace, Machine, MemoryManager};

/// Command-line configuration
struct Config {
    memory: MemoryConfig,
    executables: Vec<String>,
    disk: Option<String>,
    rounds: usize,
    verbose: bool,
}

fn main() {
    log_init::init();

    let config = match parse_args() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(&config) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn print_help(program: &str) {
    eprintln!("VM Pager - Demand-paged address spaces over a shared frame pool");
    eprintln!();
    eprintln!("Usage: {} [OPTIONS] <executable>...", program);
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  executable  - NOFF executable, relative to the current directory");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -v, --verbose      Print per-pass residency");
    eprintln!("  -f, --frames N     Number of physical frames (default 32)");
    eprintln!("  -s, --slots N      Number of swap slots (default 1024)");
    eprintln!("  -p, --page-size N  Page size in bytes (default 128)");
    eprintln!("  -d, --disk PATH    Swap to a host file instead of memory");
    eprintln!("  -r, --rounds N     Number of round-robin passes (default 1)");
    eprintln!("  -h, --help         Print this help message");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {} halt matmult", program);
    eprintln!("  {} -f 4 -r 3 -d swap.bin sort", program);
}

fn parse_number(flag: &str, value: Option<&String>) -> Result<usize, String> {
    let value = value.ok_or_else(|| format!("Missing value for {}", flag))?;
    value
        .parse()
        .map_err(|_| format!("Invalid value for {}: {}", flag, value))
}

fn parse_args() -> Result<Config, String> {
    let args: Vec<String> = env::args().collect();
    let program = &args[0];

    let mut memory = MemoryConfig::default();
    let mut disk = None;
    let mut rounds = 1;
    let mut verbose = false;
    let mut executables = Vec::new();

    let mut iter = args[1..].iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help(program);
                process::exit(0);
            }
            "-v" | "--verbose" => verbose = true,
            "-f" | "--frames" => memory.num_frames = parse_number(arg, iter.next())?,
            "-s" | "--slots" => memory.num_slots = parse_number(arg, iter.next())?,
            "-p" | "--page-size" => memory.page_size = parse_number(arg, iter.next())?,
            "-r" | "--rounds" => rounds = parse_number(arg, iter.next())?,
            "-d" | "--disk" => {
                let path = iter.next().ok_or_else(|| format!("Missing value for {}", arg))?;
                disk = Some(path.clone());
            }
            _ if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}\nUse --help for usage information.", arg));
            }
            _ => executables.push(arg.clone()),
        }
    }

    if executables.is_empty() {
        print_help(program);
        return Err("\nError: Expected at least one executable".to_string());
    }

    memory.validate().map_err(|e| e.to_string())?;

    Ok(Config {
        memory,
        executables,
        disk,
        rounds,
        verbose,
    })
}

fn run(config: &Config) -> vm_pager::Result<()> {
    let memory = config.memory;
    let store: Arc<dyn BackingStore> = match &config.disk {
        Some(path) => Arc::new(FileDisk::open(path, memory.num_slots, memory.page_size)?),
        None => Arc::new(Disk::new(memory.num_slots, memory.page_size)),
    };
    let mm = Arc::new(MemoryManager::new(memory, store)?);
    let executables = HostFileStore::new(".");
    let mut machine = Machine::new(mm.clone());

    if config.verbose {
        eprintln!("=== VM Pager ===");
        eprintln!("Page size: {}", memory.page_size);
        eprintln!("Frames:    {}", memory.num_frames);
        eprintln!("Slots:     {}", memory.num_slots);
        eprintln!("Swap:      {}", config.disk.as_deref().unwrap_or("memory"));
        eprintln!();
    }

    let mut spaces = Vec::with_capacity(config.executables.len());
    for name in &config.executables {
        let mut space = AddressSpace::new(mm.clone());
        space.load(&executables, name)?;
        info!("{}: {} pages", name, space.page_count());
        spaces.push(space);
    }

    for round in 0..config.rounds {
        for (name, space) in config.executables.iter().zip(spaces.iter_mut()) {
            space.init_registers(&mut machine)?;
            space.restore_state(&mut machine);
            for page in 0..space.page_count() {
                machine.read_mem((page * memory.page_size) as u32, 4)?;
            }
            space.save_state(&machine);

            if config.verbose {
                eprintln!("round {} {}: resident pages {:?}", round, name, space.resident_pages());
            }
        }
    }
    mm.check_accounting()?;

    println!("=== Summary ===");
    for (name, space) in config.executables.iter().zip(spaces.iter()) {
        println!(
            "{}: {} pages, {} resident",
            name,
            space.page_count(),
            space.resident_pages().len()
        );
    }
    println!("frames in use: {}/{}", memory.num_frames - mm.free_frame_count(), memory.num_frames);
    println!("slots in use:  {}", mm.used_slot_count());
    println!("{}", mm.stats());

    Ok(())
}
