//! The `tabic` driver: argument handling, the compile pipeline, and the
//! link step against the runtime libraries.

use std::env;
use std::path::PathBuf;
use std::process::{Command, ExitCode};

const HELP_TEXT: &str = "\
tabic, the Tabitha compiler

tabic compiles Tabitha bundles into executables.

Syntax: tabic [flags] [options] <root slab filename>

args:
  root slab filename: the slab containing the `main` function

options:
  -o <dir>    directory in which to place the output
  -l <name>   shared library to link with the executable
  -ls <name>  static library to link with the executable
  -L <dir>    extra directory in which to search for libraries

flags:
  --show-ast  print each slab's syntax tree as JSON
  --show-ir   print the IR produced for each slab
  --raw       link against the raw runtime with entry _tabi_start
  --c-start   start through the C runtime entry point
  -h, --help  print this help
";

struct Options {
    root_file: String,
    out_dir: PathBuf,
    link_dirs: Vec<String>,
    link_libs: Vec<String>,
    static_libs: Vec<String>,
    show_ast: bool,
    show_ir: bool,
    raw: bool,
    c_start: bool,
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let cwd = env::current_dir().expect("working directory is accessible");

    let mut options = Options {
        root_file: String::new(),
        out_dir: cwd.clone(),
        link_dirs: Vec::new(),
        link_libs: Vec::new(),
        static_libs: Vec::new(),
        show_ast: false,
        show_ir: false,
        raw: false,
        c_start: false,
    };
    let mut cursor = 0usize;
    while cursor < args.len() {
        let arg = &args[cursor];
        match arg.as_str() {
            "-o" => {
                cursor += 1;
                match args.get(cursor) {
                    Some(dir) => options.out_dir = cwd.join(dir),
                    None => return missing_value("-o"),
                }
            }
            "-l" => {
                cursor += 1;
                match args.get(cursor) {
                    Some(lib) => options.link_libs.push(lib.clone()),
                    None => return missing_value("-l"),
                }
            }
            "-ls" => {
                cursor += 1;
                match args.get(cursor) {
                    Some(lib) => options.static_libs.push(lib.clone()),
                    None => return missing_value("-ls"),
                }
            }
            "-L" => {
                cursor += 1;
                match args.get(cursor) {
                    Some(dir) => options.link_dirs.push(dir.clone()),
                    None => return missing_value("-L"),
                }
            }
            "-h" | "--help" => {
                println!("{HELP_TEXT}");
                return ExitCode::SUCCESS;
            }
            "--show-ast" => options.show_ast = true,
            "--show-ir" => options.show_ir = true,
            "--raw" => options.raw = true,
            "--c-start" => options.c_start = true,
            _ => options.root_file = arg.clone(),
        }
        cursor += 1;
    }
    if options.root_file.is_empty() {
        eprintln!("no root slab filename given; try --help");
        return ExitCode::FAILURE;
    }

    let lib_paths = env::var("TABI_LIB")
        .map(|raw| tabic::split_lib_paths(&raw))
        .unwrap_or_default();

    // Stage 1: load and shallowly declare every reachable slab.
    let mut bundle = match tabic::create_bundle(&options.root_file, &cwd, &lib_paths) {
        Ok(bundle) => bundle,
        Err(error) => {
            eprintln!("{error}");
            return ExitCode::from(1);
        }
    };
    if options.show_ast {
        for slab in &bundle.slabs {
            if let Some(tree) = &slab.tree {
                match serde_json::to_string_pretty(tree) {
                    Ok(json) => println!("{json}"),
                    Err(error) => eprintln!("cannot render tree for {}: {error}", slab.id),
                }
            }
        }
    }

    // Stage 2: resolve, type and check everything.
    if let Err(error) = tabic::elaborate_bundle(&mut bundle) {
        eprintln!("{error}");
        return ExitCode::from(2);
    }

    // Stage 3: lower to IR and persist one module per slab.
    let modules = tabic::lower_bundle(&bundle);
    if options.show_ir {
        for module in &modules {
            println!("{}", tabic::ir::write::module_to_string(module));
        }
    }
    let bc_files = match tabic::write_bundle(&bundle, &modules, &options.out_dir) {
        Ok(files) => files,
        Err(error) => {
            eprintln!("{error}");
            return ExitCode::FAILURE;
        }
    };

    // Stage 4: objects, then the executable. Both are the host
    // toolchain's job.
    let compiler = host_c_compiler();
    let mut objects = Vec::new();
    for bc in &bc_files {
        let object = bc.with_extension("o");
        let status = Command::new(compiler)
            .arg("-c")
            .arg(bc)
            .arg("-o")
            .arg(&object)
            .status();
        match status {
            Ok(status) if status.success() => objects.push(object),
            Ok(status) => return ExitCode::from(exit_code_of(status)),
            Err(error) => {
                eprintln!("cannot run {compiler}: {error}");
                return ExitCode::FAILURE;
            }
        }
    }

    let executable = bundle.slab(bundle.root).name.clone();
    let mut link = Command::new(if options.raw { "ld.lld" } else { compiler });
    link.args(&objects).arg("-o").arg(&executable);
    if options.raw {
        link.args(["-ltabi_std_raw", "-ltabi_core_raw"]);
        // The raw runtime enters at _tabi_start unless the C entry is
        // requested.
        if !options.c_start {
            link.args(["-e", "_tabi_start"]);
        }
    } else {
        if !cfg!(windows) {
            link.args(["-no-pie", "-lm"]);
        }
        link.args(["-ltabi_std_cross", "-ltabi_core_cross"]);
    }
    for dir in lib_paths {
        link.arg(format!("-L{}", dir.display()));
    }
    for dir in &options.link_dirs {
        link.arg(format!("-L{dir}"));
    }
    for lib in &options.link_libs {
        link.arg(format!("-l{lib}"));
    }
    for lib in &options.static_libs {
        link.arg(format!("-l:lib{lib}.a"));
    }
    match link.status() {
        Ok(status) if status.success() => ExitCode::SUCCESS,
        Ok(status) => ExitCode::from(exit_code_of(status)),
        Err(error) => {
            eprintln!("cannot run linker: {error}");
            ExitCode::FAILURE
        }
    }
}

fn host_c_compiler() -> &'static str {
    if cfg!(windows) { "gcc" } else { "clang" }
}

fn exit_code_of(status: std::process::ExitStatus) -> u8 {
    status
        .code()
        .and_then(|c| u8::try_from(c).ok())
        .unwrap_or(1)
}

fn missing_value(option: &str) -> ExitCode {
    eprintln!("option {option} expects a value; try --help");
    ExitCode::FAILURE
}
