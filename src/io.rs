use std::fs;
use std::path::Path;

use crate::cache::AccessKind;
use crate::memory::Strategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelpTopic {
    General,
    Standard,
    Cache,
    Mmu,
}

/// One line of the interactive command language
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    InitMemory { size: u64 },
    InitCache { size: u64, block_size: u64, associativity: u64 },
    InitMmu { page_size: u64 },
    Access { address: u64, kind: AccessKind },
    Malloc { size: u64 },
    Free { address: u64 },
    SetStrategy(Strategy),
    Dump,
    Stats,
    CacheStats,
    CacheReset,
    PageTableDump,
    Help(HelpTopic),
    Exit,
}

/// Parse a decimal or `0x`-prefixed hexadecimal number
fn parse_number(token: &str, what: &str) -> Result<u64, String> {
    let parsed = match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => token.parse(),
    };
    parsed.map_err(|_| format!("Invalid {}: {}", what, token))
}

fn expect_args(command: &str, args: &[&str], count: usize, usage: &str) -> Result<(), String> {
    if args.len() != count {
        return Err(format!("{} expects {} argument(s). Usage: {}", command, count, usage));
    }
    Ok(())
}

impl Command {
    /// Parse one line. Blank lines and `#` comments yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.split('#').next().unwrap_or("");
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&name, args)) = tokens.split_first() else {
            return Ok(None);
        };

        let command = match name {
            "init" => {
                expect_args(name, args, 2, "init standard <size>")?;
                if args[0] != "standard" {
                    return Err(format!("Unknown memory type: {}. Use 'standard'.", args[0]));
                }
                Command::InitMemory { size: parse_number(args[1], "size")? }
            }
            "init_cache" => {
                expect_args(name, args, 3, "init_cache <size> <block> <ways>")?;
                Command::InitCache {
                    size: parse_number(args[0], "cache size")?,
                    block_size: parse_number(args[1], "block size")?,
                    associativity: parse_number(args[2], "associativity")?,
                }
            }
            "init_mmu" => {
                expect_args(name, args, 1, "init_mmu <page_size>")?;
                Command::InitMmu { page_size: parse_number(args[0], "page size")? }
            }
            "access" => {
                expect_args(name, args, 2, "access <addr> <r|w>")?;
                Command::Access {
                    address: parse_number(args[0], "address")?,
                    kind: AccessKind::from_name(args[1])
                        .ok_or_else(|| format!("Invalid access kind: {}", args[1]))?,
                }
            }
            "malloc" => {
                expect_args(name, args, 1, "malloc <size>")?;
                Command::Malloc { size: parse_number(args[0], "size")? }
            }
            "free" => {
                expect_args(name, args, 1, "free <address>")?;
                Command::Free { address: parse_number(args[0], "address")? }
            }
            "set" => {
                expect_args(name, args, 2, "set allocator <first|best|worst>")?;
                if args[0] != "allocator" {
                    return Err(format!("Unknown setting: {}", args[0]));
                }
                Command::SetStrategy(
                    Strategy::from_name(args[1])
                        .ok_or_else(|| format!("Unknown strategy: {}", args[1]))?,
                )
            }
            "dump" => Command::Dump,
            "stats" => Command::Stats,
            "cache_stats" => Command::CacheStats,
            "cache_reset" => Command::CacheReset,
            "pt_dump" => Command::PageTableDump,
            "help" => Command::Help(match args.first() {
                Some(&"standard") => HelpTopic::Standard,
                Some(&"cache") => HelpTopic::Cache,
                Some(&"mmu") => HelpTopic::Mmu,
                _ => HelpTopic::General,
            }),
            "exit" | "quit" => Command::Exit,
            _ => return Err(format!("Unknown command: {}. Type 'help'.", name)),
        };

        Ok(Some(command))
    }
}

/// Read a script file into its lines
pub fn read_script<P: AsRef<Path>>(path: P) -> Result<Vec<String>, String> {
    let content = fs::read_to_string(path.as_ref())
        .map_err(|e| format!("Failed to read script file: {}", e))?;
    Ok(content.lines().map(str::to_string).collect())
}
