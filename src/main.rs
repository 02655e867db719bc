//! Memory hierarchy simulator - interactive front end
//!
//! Usage: rust-memory-hierarchy [OPTIONS]
//!
//! Commands are read from stdin, or from a script with `--script <FILE>`.
//! Type `help` at the prompt for the command list.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result, anyhow, bail};
use clap::{App, Arg, ArgMatches, crate_version};
use log::LevelFilter;

use rust_memory_hierarchy::constants::*;
use rust_memory_hierarchy::io::{Command, HelpTopic, read_script};
use rust_memory_hierarchy::logging;
use rust_memory_hierarchy::translation::MmuOutcome;
use rust_memory_hierarchy::vm_manager::{AccessReport, VMManager};
use rust_memory_hierarchy::SimError;

fn main() -> Result<()> {
    let matches = App::new("rust-memory-hierarchy")
        .version(crate_version!())
        .about("Simulates a physical allocator, a two-level cache and an MMU")
        .arg(
            Arg::with_name("script")
                .short("s")
                .long("script")
                .takes_value(true)
                .value_name("FILE")
                .help("Run commands from FILE instead of stdin"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Log every simulated event"),
        )
        .arg(
            Arg::with_name("quiet")
                .short("q")
                .long("quiet")
                .conflicts_with("verbose")
                .help("Only log errors"),
        )
        .arg(
            Arg::with_name("preset")
                .short("p")
                .long("preset")
                .help("Start with default memory, cache and MMU"),
        )
        .arg(
            Arg::with_name("memory")
                .long("memory")
                .takes_value(true)
                .value_name("SIZE")
                .help("Initialize physical memory of SIZE bytes"),
        )
        .arg(
            Arg::with_name("cache")
                .long("cache")
                .takes_value(true)
                .value_name("SIZE,BLOCK,WAYS")
                .help("Initialize the cache (L2 is 8x SIZE)"),
        )
        .arg(
            Arg::with_name("page-size")
                .long("page-size")
                .takes_value(true)
                .value_name("SIZE")
                .help("Enable virtual addressing with SIZE-byte pages"),
        )
        .get_matches();

    let level = if matches.is_present("verbose") {
        LevelFilter::Info
    } else if matches.is_present("quiet") {
        LevelFilter::Error
    } else {
        LevelFilter::Warn
    };
    logging::init(level)?;

    let mut vm = VMManager::new();
    preinitialize(&mut vm, &matches)?;

    match matches.value_of("script") {
        Some(path) => {
            let lines = read_script(path).map_err(|e| anyhow!(e))?;
            for line in lines {
                println!("> {}", line);
                if !run_line(&mut vm, &line) {
                    break;
                }
            }
        }
        None => repl(&mut vm)?,
    }

    Ok(())
}

fn parse_size(value: &str, what: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid {}: {}", what, value))
}

fn preinitialize(vm: &mut VMManager, matches: &ArgMatches) -> Result<()> {
    let preset = matches.is_present("preset");

    let memory = match matches.value_of("memory") {
        Some(size) => Some(parse_size(size, "memory size")?),
        None => preset.then_some(DEFAULT_MEMORY_SIZE),
    };
    if let Some(size) = memory {
        vm.init_memory(size)?;
    }

    let cache = match matches.value_of("cache") {
        Some(geometry) => {
            let parts: Vec<&str> = geometry.split(',').collect();
            if parts.len() != 3 {
                bail!("--cache expects SIZE,BLOCK,WAYS, got {}", geometry);
            }
            Some((
                parse_size(parts[0], "cache size")?,
                parse_size(parts[1], "block size")?,
                parse_size(parts[2], "associativity")?,
            ))
        }
        None => preset.then_some((DEFAULT_CACHE_SIZE, DEFAULT_BLOCK_SIZE, DEFAULT_ASSOCIATIVITY)),
    };
    if let Some((size, block, ways)) = cache {
        vm.init_cache(size, block, ways)?;
    }

    let page_size = match matches.value_of("page-size") {
        Some(size) => Some(parse_size(size, "page size")?),
        None => preset.then_some(DEFAULT_PAGE_SIZE),
    };
    if let Some(size) = page_size {
        vm.init_mmu(size)?;
    }

    Ok(())
}

fn repl(vm: &mut VMManager) -> Result<()> {
    println!("========================================");
    println!("   Memory & Cache Simulator Started");
    println!("========================================");
    println!("Type 'help' for commands.");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        if !run_line(vm, &line?) {
            break;
        }
    }
    Ok(())
}

/// Parse and execute one line. Returns false once the session should end.
fn run_line(vm: &mut VMManager, line: &str) -> bool {
    match Command::parse(line) {
        Ok(Some(Command::Exit)) => false,
        Ok(Some(command)) => {
            if let Err(e) = execute(vm, command) {
                println!("Error: {}", e);
            }
            true
        }
        Ok(None) => true,
        Err(msg) => {
            println!("{}", msg);
            true
        }
    }
}

fn execute(vm: &mut VMManager, command: Command) -> Result<(), SimError> {
    match command {
        Command::InitMemory { size } => {
            let notice = vm.init_memory(size)?;
            if notice.cache_reset {
                println!("Note: Cache reset due to memory change.");
            }
            if notice.mmu_reset {
                println!("Note: MMU reset due to memory change.");
            }
            println!("Standard Allocator Initialized ({} bytes).", size);
        }
        Command::InitCache { size, block_size, associativity } => {
            let linked = vm.init_cache(size, block_size, associativity)?;
            if let Some(cache) = vm.cache() {
                let l2 = cache.l2().map_or(0, |l2| l2.geometry().size);
                println!("Cache Initialized (L1: {}B, L2: {}B).", cache.l1().geometry().size, l2);
            }
            if linked {
                println!("-> Linked to Active Memory.");
            } else {
                println!("-> Warning: No Memory Initialized yet.");
            }
        }
        Command::InitMmu { page_size } => {
            vm.init_mmu(page_size)?;
            println!("Virtual Addressing Enabled ({}-byte pages).", page_size);
        }
        Command::Access { address, kind } => print_access(&vm.access(address, kind)?),
        Command::Malloc { size } => {
            let address = vm.malloc(size)?;
            println!("Allocated {} bytes at {}", size, address);
        }
        Command::Free { address } => {
            vm.free(address)?;
            println!("Block at address {} freed.", address);
        }
        Command::SetStrategy(strategy) => {
            vm.set_strategy(strategy)?;
            println!("Allocation strategy: {}", strategy);
        }
        Command::Dump => {
            println!("--- Memory Dump ---");
            for region in vm.regions()? {
                println!("{}", region);
            }
            println!("-------------------");
        }
        Command::Stats => {
            let stats = vm.memory_stats()?;
            println!("--- Statistics ---");
            println!("Total Memory:       {}", stats.total);
            println!("Used Memory:        {} ({:.2}%)", stats.used, stats.used_pct);
            println!("Free Memory:        {}", stats.free);
            println!("Largest Free Block: {}", stats.largest_free);
            println!("Total Requests:     {}", stats.requests);
            println!("Success Rate:       {}/{}", stats.successes, stats.requests);
            println!("Failed Requests:    {}", stats.failures);
            println!("External Frag:      {:.2}%", stats.ext_frag_pct);
            println!("------------------");
        }
        Command::CacheStats => {
            println!("--- Cache Statistics ---");
            for level in vm.cache_stats()? {
                println!("{}", level);
            }
            println!("------------------------");
        }
        Command::CacheReset => {
            vm.reset_cache_stats()?;
            println!("Cache statistics cleared.");
        }
        Command::PageTableDump => {
            println!("--- Page Table ---");
            println!("VPN   | Valid | Frame | Dirty | LRU Time");
            for row in vm.page_table()? {
                println!("{}", row);
            }
            println!("------------------");
        }
        Command::Help(topic) => print_help(topic),
        Command::Exit => {}
    }
    Ok(())
}

fn print_access(report: &AccessReport) {
    match report {
        AccessReport::Physical { address, outcome, .. } => {
            match outcome.into_result(*address) {
                Ok(outcome) => println!("[Physical Access] {} at {}", outcome, address),
                Err(e) => println!("[Physical Access] {}", e),
            }
        }
        AccessReport::Virtual(access) => {
            for event in &access.events {
                println!(">> {}", event);
            }
            match access.outcome {
                MmuOutcome::Translated { physical_address, cache } => {
                    println!(
                        "   [MMU] VA {} -> VPN {} -> PA {}",
                        access.address.va, access.address.vpn, physical_address
                    );
                    match cache.map(|c| c.into_result(physical_address)) {
                        Some(Ok(outcome)) => println!("   [Cache] {}", outcome),
                        Some(Err(e)) => println!("   [Cache] {}", e),
                        None => println!("   [MMU] No cache connected. Access complete."),
                    }
                }
                MmuOutcome::PageFaultUnresolved => {
                    if let Err(e) = access.to_result() {
                        println!("CRITICAL: {}", e);
                    }
                }
            }
        }
    }
}

fn print_help(topic: HelpTopic) {
    match topic {
        HelpTopic::General => {
            println!("Commands:");
            println!("  init standard <size>             : Initialize memory allocator");
            println!("  init_cache <size> <block> <ways> : Initialize L1/L2 cache");
            println!("  init_mmu <page_size>             : Initialize virtual memory");
            println!("  help <standard|cache|mmu>        : Specific help menus");
            println!("  exit                             : Quit");
        }
        HelpTopic::Standard => {
            println!("  malloc <size>                    : Allocate memory");
            println!("  free <address>                   : Free block by start address");
            println!("  set allocator <first|best|worst> : Change strategy");
            println!("  dump                             : Show memory map");
            println!("  stats                            : Show fragmentation stats");
        }
        HelpTopic::Cache => {
            println!("  init_cache <size> <block> <ways> : L2 is {}x <size>", L2_SIZE_MULTIPLIER);
            println!("  access <addr> <r|w>              : Virtual if MMU active, else physical");
            println!("  cache_stats                      : Hits, misses and hit rate");
            println!("  cache_reset                      : Clear cache statistics");
        }
        HelpTopic::Mmu => {
            println!("  init_mmu <page_size>             : Page/frame size in bytes");
            println!("  access <v_addr> <r|w>            : Translate and access");
            println!("  pt_dump                          : Dump the page table");
        }
    }
}
