//! `teac`: the tea compiler driver (§6).
//!
//! A single flat command — read one source file, run it through
//! lex/parse/check/codegen, then emit either a native object file or VM
//! bytecode. No project manifest, no subcommand tree: the cargo-like
//! surface that project used belongs to an out-of-scope toolchain layer.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::LevelFilter;

use tea_common::panic;
use tea_common::panic::CompilerPanic;
use tea_ir::codegen::CodeGenerator;
use tea_ir::ir::Context as IrContext;
use tea_ir::llvm_backend::NativeBackend;
use tea_ir::vm_backend::VmBackend;
use tea_lexer::Lexer;
use tea_parser::Parser as TeaParser;
use tea_sema::{Sema, TypeCtx};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    Native,
    Vm,
}

/// The tea language compiler.
#[derive(Parser, Debug)]
#[command(name = "teac", about = "Compile a tea source file to a native object or VM bytecode")]
struct Cli {
    /// Source file to compile.
    source: PathBuf,

    /// Output file. Defaults to the source's stem with a backend-appropriate
    /// extension (`.o` for native, `.tbc` for vm).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Target triple. Defaults to the host triple.
    #[arg(short, long)]
    triple: Option<String>,

    /// Optimization level. Hint-only: the MIR produced is unaffected.
    #[arg(short = 'O', default_value_t = 2, value_parser = clap::value_parser!(u8).range(0..=3))]
    opt_level: u8,

    /// Additional import search directory. May be repeated.
    #[arg(short = 'I', long = "import-dir")]
    import_dirs: Vec<PathBuf>,

    /// Verbose: raise the log level and dump MIR/low-level IR/bytecode to stdout.
    #[arg(short, long)]
    verbose: bool,

    /// Dump flag: `dump-mir` or `dump-final-ir`. May be repeated.
    #[arg(short = 'f', long = "flag")]
    flags: Vec<String>,

    /// Which back end to use.
    #[arg(long, value_enum, default_value_t = Backend::Native)]
    backend: Backend,
}

const KNOWN_FLAGS: &[&str] = &["dump-mir", "dump-final-ir"];

fn default_output(source: &Path, backend: Backend) -> PathBuf {
    let stem = source.file_stem().unwrap_or_default();
    let ext = match backend {
        Backend::Native => "o",
        Backend::Vm => "tbc",
    };
    PathBuf::from(stem).with_extension(ext)
}

fn run(cli: &Cli) -> Result<()> {
    for flag in &cli.flags {
        if !KNOWN_FLAGS.contains(&flag.as_str()) {
            anyhow::bail!("unknown flag '{flag}', expected one of {KNOWN_FLAGS:?}");
        }
    }

    let source_text = fs::read_to_string(&cli.source)
        .with_context(|| format!("reading '{}'", cli.source.display()))?;

    let source_name = cli
        .source
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("<source>")
        .to_string();

    let file_id = 0u32;

    let mut lexer = Lexer::new(&source_text, file_id);
    let tokens = lexer.tokenize();

    let mut parser = TeaParser::new(tokens, file_id);
    let program = parser.parse_program();

    let type_ctx = TypeCtx::new();
    let sema = Sema::new(&type_ctx, cli.import_dirs.clone(), file_id);
    sema.check(&program).with_context(|| format!("checking '{}'", cli.source.display()))?;

    let ir_ctx = IrContext::new();
    let codegen = CodeGenerator::new(&ir_ctx, &source_name, cli.import_dirs.clone(), file_id);
    let module = codegen.generate(&program);

    if cli.verbose || cli.flags.iter().any(|f| f == "dump-mir") {
        println!("{}", dump_mir(&module));
    }

    let output_path = cli.output.clone().unwrap_or_else(|| default_output(&cli.source, cli.backend));

    match cli.backend {
        Backend::Native => {
            let llvm_ctx = inkwell::context::Context::create();
            let triple = cli.triple.clone().unwrap_or_default();
            let backend =
                NativeBackend::new(&llvm_ctx, &source_name, &triple, cli.opt_level, module.data_layout.get())
                    .context("setting up the native back end")?;
            let backend = backend
                .compile(&ir_ctx, &module)
                .with_context(|| format!("compiling '{}' to native code", cli.source.display()))?;

            if cli.verbose || cli.flags.iter().any(|f| f == "dump-final-ir") {
                println!("{}", backend.print_to_string());
            }

            backend
                .emit_object(&output_path)
                .with_context(|| format!("writing object file '{}'", output_path.display()))?;
        }
        Backend::Vm => {
            let backend = VmBackend::new()
                .compile(&module)
                .with_context(|| format!("compiling '{}' to bytecode", cli.source.display()))?;
            let bytes = backend.to_bytes();

            if cli.verbose || cli.flags.iter().any(|f| f == "dump-final-ir") {
                println!("{}", tea_ir::vm_backend::dump(&bytes));
            }

            fs::write(&output_path, &bytes)
                .with_context(|| format!("writing bytecode file '{}'", output_path.display()))?;
        }
    }

    Ok(())
}

fn dump_mir(module: &Rc<tea_ir::ir::ModuleData>) -> String {
    let mut out = String::new();
    out.push_str(&format!("module {:?} triple {:?}\n", module.source.borrow(), module.triple.borrow()));
    for item in module.items().iter() {
        match item {
            tea_ir::ir::Item::Function(f) => {
                out.push_str(&format!("func {} blocks={}\n", f.name, f.blocks().len()));
            }
            tea_ir::ir::Item::Global(g) => {
                out.push_str(&format!("global {}\n", g.name));
            }
        }
    }
    out
}

fn init_logging(verbose: bool) {
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match panic::catch(|| run(&cli)) {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(err)) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
        Err(CompilerPanic { message }) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}
