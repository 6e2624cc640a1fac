//! DXIL bitcode inspection tool

use clap::{ArgAction, Parser, Subcommand};
use dxilbc::{
    DecodeBuilder, DecodeFlags, DecodeResult, DxbcContainer, FourCC, ModuleInfo, locate_bitcode,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dxilbc")]
#[command(about = "DXIL bitcode inspection tool", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the decoded bitstream tree
    Dump {
        /// Input file: raw bitcode, a bitcode wrapper, or a DXBC container
        input: PathBuf,

        /// First bit of the bitstream (default: located from the input)
        #[arg(long, requires = "length_bits")]
        start_bit: Option<u64>,

        /// Length of the bitstream in bits
        #[arg(long, requires = "start_bit")]
        length_bits: Option<u64>,

        /// Print the tree as JSON
        #[arg(long)]
        json: bool,

        /// Do not parse function bodies
        #[arg(long)]
        no_functions: bool,

        /// Stop at the first deferred function body once the symbol table is read
        #[arg(long)]
        lazy: bool,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the parts of a DXBC container
    Parts {
        /// Input DXBC file
        input: PathBuf,
    },

    /// Show module information
    Info {
        /// Input file: raw bitcode, a bitcode wrapper, or a DXBC container
        input: PathBuf,

        /// Print the module information as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_input(input: &Path) -> Result<Vec<u8>, String> {
    dxilbc::read_input(input)
        .map_err(|e| format!("Failed to read {}: {} ({})", input.display(), e, e.kind()))
}

fn dump_bitcode(
    input: PathBuf,
    window: Option<(u64, u64)>,
    json: bool,
    no_functions: bool,
    lazy: bool,
    output: Option<PathBuf>,
) -> Result<(), String> {
    let bytes = read_input(&input)?;

    let mut flags = DecodeFlags::empty();
    if !no_functions {
        flags |= DecodeFlags::MATERIALIZE_FUNCTIONS;
    }
    if lazy {
        flags |= DecodeFlags::STOP_AT_SUSPEND;
    }

    let builder = match window {
        Some((start_bit, length_bits)) => {
            DecodeBuilder::new(&bytes).window(start_bit, length_bits)
        }
        None => DecodeBuilder::new(&bytes)
            .locate()
            .map_err(|e| format!("{}", e))?,
    };
    let result = builder.flags(flags).decode();

    let text = if json {
        let mut text = serde_json::to_string_pretty(&result.tree)
            .map_err(|e| format!("Failed to serialize tree: {}", e))?;
        text.push('\n');
        text
    } else {
        result.tree.to_string()
    };

    if let Some(output) = output {
        std::fs::write(&output, text.as_bytes())
            .map_err(|e| format!("Failed to write {}: {}", output.display(), e))?;
        eprintln!("Decoded {} -> {}", input.display(), output.display());
    } else {
        print!("{}", text);
    }

    match result.error {
        Some(error) => Err(format!("Decoding stopped: {} ({})", error, error.kind())),
        None => Ok(()),
    }
}

fn list_parts(input: PathBuf) -> Result<(), String> {
    let bytes = read_input(&input)?;

    let container = DxbcContainer::parse(&bytes).map_err(|e| format!("{}", e))?;
    println!(
        "Container: {} bytes, {} parts",
        container.total_size(),
        container.parts().len()
    );
    for part in container.parts() {
        println!(
            "  {}  offset {:#08x}  size {}",
            part.fourcc,
            part.offset,
            part.data.len()
        );
    }

    match locate_bitcode(&bytes) {
        Ok(location) => {
            println!();
            println!("Bitcode: {}", location.source);
            if let Some(program) = &location.program {
                println!("  Target: {}", program.target);
                println!("  DXIL version: {}.{}", program.dxil_major, program.dxil_minor);
            }
            println!(
                "  Window: bit {} length {} ({} bytes)",
                location.start_bit,
                location.length_bits,
                location.length_bits / 8
            );
        }
        Err(e) => {
            let has_program = container.part(FourCC::DXIL).is_some()
                || container.part(FourCC::ILDB).is_some();
            if has_program {
                return Err(format!("{}", e));
            }
        }
    }

    Ok(())
}

fn print_module_info(info: &ModuleInfo) {
    if let Some(version) = info.version {
        println!("Version: {}", version);
    }
    if let Some(triple) = &info.triple {
        println!("Triple: {}", triple);
    }
    if let Some(layout) = &info.datalayout {
        println!("Data layout: {}", layout);
    }
    println!();

    if !info.types.is_empty() {
        println!("Types ({}):", info.types.len());
        for (id, _) in info.types.iter() {
            println!("  [{:3}] {}", id, info.types.display(id));
        }
        println!();
    }

    if !info.globals.is_empty() {
        println!("Globals ({}):", info.globals.len());
        for global in &info.globals {
            let name = global
                .name
                .clone()
                .unwrap_or_else(|| global.value_id.to_string());
            let kind = if global.is_const { "constant" } else { "global" };
            println!(
                "  @{} = {} {} {}",
                name,
                global.linkage,
                kind,
                info.types.display(global.type_id)
            );
        }
        println!();
    }

    if !info.functions.is_empty() {
        println!("Functions ({}):", info.functions.len());
        for (index, function) in info.functions.iter().enumerate() {
            let kind = if function.is_proto { "declare" } else { "define" };
            println!(
                "  {} {} {}",
                kind,
                info.types.display(function.type_id),
                info.function_name(index)
            );
        }
        println!();
    }

    if !info.attribute_groups.is_empty() {
        println!("Attribute groups ({}):", info.attribute_groups.len());
        for group in &info.attribute_groups {
            println!("  {}", group);
        }
        println!();
    }

    if !info.named_metadata.is_empty() {
        println!("Named metadata:");
        for name in &info.named_metadata {
            println!("  !{}", name);
        }
        println!();
    }

    println!("Values: {}", info.value_count);
    println!("Function bodies: {}", info.function_bodies.len());
}

fn show_info(input: PathBuf, json: bool) -> Result<(), String> {
    let bytes = read_input(&input)?;

    let DecodeResult { module, error, .. } = DecodeBuilder::new(&bytes)
        .locate()
        .map_err(|e| format!("{}", e))?
        .flags(DecodeFlags::empty())
        .decode();

    if json {
        let text = serde_json::to_string_pretty(&module)
            .map_err(|e| format!("Failed to serialize module info: {}", e))?;
        println!("{}", text);
    } else {
        print_module_info(&module);
    }

    match error {
        Some(error) => Err(format!("Decoding stopped: {} ({})", error, error.kind())),
        None => Ok(()),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Dump {
            input,
            start_bit,
            length_bits,
            json,
            no_functions,
            lazy,
            output,
        } => dump_bitcode(
            input,
            start_bit.zip(length_bits),
            json,
            no_functions,
            lazy,
            output,
        ),
        Commands::Parts { input } => list_parts(input),
        Commands::Info { input, json } => show_info(input, json),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
