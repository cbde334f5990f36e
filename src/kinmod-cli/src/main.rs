// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{LevelFilter, debug, info};

use kinmod_core::datamodel::{ModelContext, OntologySnapshot};
use kinmod_engine::{AssemblerOptions, SimulationProgram, assemble, assemble_batch, compile};

#[derive(Parser, Debug)]
#[command(version, about = "Compile kinetic model formulas and assemble simulation programs")]
struct Args {
    /// Log resolution and assembly steps (ignores RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile one MathML formula to a numpy expression
    Compile {
        /// MathML file, or - for stdin
        #[arg(name = "FORMULA_FILE")]
        path: PathBuf,

        /// Text appended to every identifier
        #[arg(short, long, default_value = "")]
        suffix: String,

        /// Print code and free symbols as JSON
        #[arg(long)]
        json: bool,
    },
    /// Assemble the simulation program for one model context
    Assemble {
        #[command(flatten)]
        inputs: Inputs,

        /// Context JSON file
        #[arg(short, long)]
        context: PathBuf,

        /// Write the program here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also write the parameter table as JSON
        #[arg(long)]
        table: Option<PathBuf>,
    },
    /// Print the parameter table for one model context
    Params {
        #[command(flatten)]
        inputs: Inputs,

        /// Context JSON file
        #[arg(short, long)]
        context: PathBuf,
    },
    /// Assemble every context of a JSON array in parallel
    Batch {
        #[command(flatten)]
        inputs: Inputs,

        /// JSON file holding an array of contexts
        #[arg(short, long)]
        contexts: PathBuf,

        /// Directory receiving N.py and N.params.json per context
        #[arg(long)]
        out_dir: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct Inputs {
    /// Ontology snapshot JSON file
    #[arg(long)]
    ontology: PathBuf,

    /// Assembler options JSON file
    #[arg(long)]
    options: Option<PathBuf>,
}

impl Inputs {
    fn load(&self) -> Result<(OntologySnapshot, AssemblerOptions)> {
        let snapshot = OntologySnapshot::from_json(&read_input(&self.ontology)?)
            .with_context(|| format!("reading ontology {}", self.ontology.display()))?;
        let options = match self.options.as_ref() {
            Some(path) => serde_json::from_str(&read_input(path)?)
                .with_context(|| format!("reading options {}", path.display()))?,
            None => AssemblerOptions::default(),
        };
        Ok((snapshot, options))
    }
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    fs::read_to_string(path).with_context(|| format!("can't read {}", path.display()))
}

fn load_context(path: &Path) -> Result<ModelContext> {
    ModelContext::from_json(&read_input(path)?)
        .with_context(|| format!("reading context {}", path.display()))
}

fn write_program(program: &SimulationProgram, source: &Path, table: &Path) -> Result<()> {
    fs::write(source, &program.source)
        .with_context(|| format!("can't write {}", source.display()))?;
    fs::write(table, program.parameter_table.to_json()?)
        .with_context(|| format!("can't write {}", table.display()))?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.verbose {
        env_logger::builder().filter_level(LevelFilter::Debug).init();
    } else {
        env_logger::init();
    }

    match args.command {
        Command::Compile { path, suffix, json } => {
            let expr = compile(&read_input(&path)?, &suffix)?;
            if json {
                let out = serde_json::json!({
                    "code": expr.code,
                    "free_symbols": expr.free_symbols,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("{}", expr.code);
            }
        }
        Command::Assemble {
            inputs,
            context,
            output,
            table,
        } => {
            let (snapshot, options) = inputs.load()?;
            let context = load_context(&context)?;
            let program = assemble(&snapshot, &context, &options)?;
            match output {
                Some(path) => fs::write(&path, &program.source)
                    .with_context(|| format!("can't write {}", path.display()))?,
                None => print!("{}", program.source),
            }
            if let Some(path) = table {
                fs::write(&path, program.parameter_table.to_json()?)
                    .with_context(|| format!("can't write {}", path.display()))?;
            }
        }
        Command::Params { inputs, context } => {
            let (snapshot, options) = inputs.load()?;
            let context = load_context(&context)?;
            let program = assemble(&snapshot, &context, &options)?;
            println!("{}", program.parameter_table.to_json()?);
        }
        Command::Batch {
            inputs,
            contexts,
            out_dir,
        } => {
            let (snapshot, options) = inputs.load()?;
            let contexts: Vec<ModelContext> = serde_json::from_str(&read_input(&contexts)?)
                .with_context(|| format!("reading contexts {}", contexts.display()))?;
            fs::create_dir_all(&out_dir)?;

            let results = assemble_batch(&snapshot, &contexts, &options);
            let mut failed = 0;
            for (i, result) in results.iter().enumerate() {
                match result {
                    Ok(program) => {
                        let source = out_dir.join(format!("{i}.py"));
                        let table = out_dir.join(format!("{i}.params.json"));
                        write_program(program, &source, &table)?;
                        debug!("context {i}: wrote {}", source.display());
                    }
                    Err(err) => {
                        failed += 1;
                        eprintln!("context {i}: {err}");
                    }
                }
            }
            info!("assembled {} of {} contexts", results.len() - failed, results.len());
            if failed > 0 {
                bail!("{failed} of {} contexts failed", results.len());
            }
        }
    }

    Ok(())
}
