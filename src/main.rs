// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! keel - script runner with require/load
//!
//! Runs a script file (`.rb` source, `.mrb` image or native extension),
//! evaluates inline code, compiles source into bytecode images, or starts an
//! interactive REPL.

mod repl;

use anyhow::Context;
use clap::Parser;
use keel_require::{dispatch::dispatch, finalize, install, LoaderConfig};
use keel_vm::{Vm, VmError, VERSION};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "keel",
    about = "Script runner with require/load for the keel interpreter",
    version = VERSION,
    author = "Pegasus Heavy Industries"
)]
struct Cli {
    /// Script to run (.rb, .mrb, .so/.dll/.dylib)
    script: Option<PathBuf>,

    /// Evaluate code from the command line
    #[arg(short = 'e', long = "eval", value_name = "CODE", conflicts_with = "script")]
    eval: Option<String>,

    /// Require a library before running (repeatable)
    #[arg(short = 'r', long = "require", value_name = "NAME")]
    require: Vec<String>,

    /// Put a directory in front of the load path (repeatable)
    #[arg(short = 'I', value_name = "DIR")]
    include: Vec<PathBuf>,

    /// Loader configuration file (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Compile a source file into a bytecode image instead of running
    #[arg(long, value_name = "SRC", conflicts_with_all = ["script", "eval"])]
    compile: Option<PathBuf>,

    /// Output path for --compile (defaults to SRC with a .mrb extension)
    #[arg(short = 'o', long = "output", value_name = "OUT", requires = "compile")]
    output: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("keel=debug,keel_require=debug")
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("keel=warn")
            .with_writer(std::io::stderr)
            .init();
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    if let Some(src) = &cli.compile {
        let out = cli
            .output
            .clone()
            .unwrap_or_else(|| src.with_extension("mrb"));
        compile_file(src, &out)?;
        println!("{} {}", "wrote".green(), out.display());
        return Ok(ExitCode::SUCCESS);
    }

    let config = loader_config(&cli)?;
    let mut vm = Vm::new();
    if let Err(e) = install(&mut vm, &config) {
        report(&VmError::from(e));
        return Ok(ExitCode::FAILURE);
    }

    let ok = if let Some(code) = &cli.eval {
        match vm.eval(code, "-e") {
            Ok(_) => true,
            Err(e) => {
                report(&e);
                false
            }
        }
    } else if let Some(script) = &cli.script {
        run_script(&mut vm, script)
    } else {
        let mut repl = repl::Repl::new(&mut vm).context("failed to initialize REPL")?;
        repl.run().context("REPL error")?;
        true
    };

    let finalized = match finalize(&mut vm) {
        Ok(()) => true,
        Err(e) => {
            report(&VmError::from(e));
            false
        }
    };

    Ok(if ok && finalized {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Builds the loader configuration: file and environment, then `-I`/`-r`.
fn loader_config(cli: &Cli) -> anyhow::Result<LoaderConfig> {
    let mut config = LoaderConfig::load(cli.config.as_deref())?;
    let includes: Vec<String> = cli
        .include
        .iter()
        .map(|dir| dir.to_string_lossy().into_owned())
        .collect();
    config.search_path.splice(0..0, includes);
    config.preload.extend(cli.require.iter().cloned());
    Ok(config)
}

/// Runs a script file with the loader its extension selects.
fn run_script(vm: &mut Vm, script: &Path) -> bool {
    match dispatch(vm, script) {
        Ok(()) => true,
        Err(e) => {
            report(&VmError::from(e));
            false
        }
    }
}

/// Compiles `src` into a bytecode image at `out`.
fn compile_file(src: &Path, out: &Path) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(src)
        .with_context(|| format!("failed to read {}", src.display()))?;
    let irep = keel_vm::compile(&source, &src.to_string_lossy())?;
    std::fs::write(out, keel_vm::dump::dump(&irep))
        .with_context(|| format!("failed to write {}", out.display()))?;
    tracing::debug!("compiled {} -> {}", src.display(), out.display());
    Ok(())
}

/// Prints an error that reached the top level.
pub(crate) fn report(error: &VmError) {
    if error.is_fatal() {
        // already carries its "fatal:" prefix
        eprintln!("{}", error.to_string().red().bold());
    } else {
        eprintln!("{}: {}", "Error".red().bold(), error);
    }
}
