use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use m0_backend::{compile_ir, ir, SpillPolicy};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "m0c")]
#[command(about = "Code generator for the m0 language: textual IR in, x86 assembly out")]
struct Args {
    /// Path to the IR dump to compile
    file: PathBuf,

    /// Print the parsed IR. If none of --ir/--asm/--both is given, defaults to --asm.
    #[arg(long)]
    ir: bool,

    /// Generate assembly (written next to the input with an `.s` suffix)
    #[arg(long)]
    asm: bool,

    /// Print the IR and generate assembly
    #[arg(long)]
    both: bool,

    /// Spill victim selection strategy
    #[arg(long, value_enum, default_value_t = AllocOpt::Fixed)]
    alloc: AllocOpt,

    /// Write the assembly here instead of next to the input
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum AllocOpt {
    Fixed,
    Lru,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let src = fs::read_to_string(&args.file)
        .with_context(|| format!("reading '{}'", args.file.display()))?;

    let mut want_ir = args.ir;
    let mut want_asm = args.asm;
    if args.both {
        want_ir = true;
        want_asm = true;
    }
    if !want_ir && !want_asm {
        want_asm = true;
    }

    let mut program = ir::reader::parse(&src)
        .with_context(|| format!("parsing '{}'", args.file.display()))?;

    if want_ir {
        print!("{program}");
    }

    if want_asm {
        let policy = match args.alloc {
            AllocOpt::Fixed => SpillPolicy::Fixed,
            AllocOpt::Lru => SpillPolicy::Lru,
        };
        let asm = compile_ir(&mut program, policy)?;

        let out_path = args.output.unwrap_or_else(|| {
            let mut name = args.file.as_os_str().to_owned();
            name.push(".s");
            PathBuf::from(name)
        });
        fs::write(&out_path, asm + "\n")
            .with_context(|| format!("writing '{}'", out_path.display()))?;
    }

    Ok(())
}
