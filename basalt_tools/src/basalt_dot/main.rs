extern crate basalt_ir;
extern crate clap;
extern crate env_logger;

use std::env::temp_dir;
use std::fs::File;
use std::io::prelude::*;
use std::process::Command;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    bir_file: String,

    #[arg(short, long, default_value_t = String::new())]
    function: String,

    #[arg(short, long, default_value_t = String::new())]
    output: String,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if !args.bir_file.ends_with(".bir") {
        eprintln!("WARNING: Running basalt_dot on a file without a .bir extension - interpreting as a textual Basalt IR file.");
    }

    let mut file = File::open(&args.bir_file).expect("PANIC: Unable to open input file.");
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .expect("PANIC: Unable to read input file contents.");
    let module =
        basalt_ir::parse::parse(&contents).expect("PANIC: Failed to parse Basalt IR file.");
    basalt_ir::verify::verify(&module).expect("PANIC: Failed to verify Basalt IR module.");

    // One function's memory effect graph per dump - the first one by default.
    let function = if args.function.is_empty() {
        module
            .functions
            .first()
            .expect("PANIC: Basalt IR module contains no functions.")
    } else {
        module
            .functions
            .iter()
            .find(|function| function.name == args.function)
            .expect("PANIC: No function with the requested name.")
    };
    let cfg = basalt_ir::cfg::cfg(function);
    let ssa = basalt_ir::memssa::memory_ssa(function, &cfg);
    let mut printed = String::new();
    basalt_ir::dot::write_dot(function, &module, &ssa, &mut printed)
        .expect("PANIC: Unable to generate output file contents.");

    if args.output.is_empty() {
        let mut tmp_path = temp_dir();
        tmp_path.push("basalt_dot.dot");
        let mut file = File::create(tmp_path.clone()).expect("PANIC: Unable to open output file.");
        file.write_all(printed.as_bytes())
            .expect("PANIC: Unable to write output file contents.");
        Command::new("xdot")
            .args([tmp_path])
            .output()
            .expect("PANIC: Couldn't execute xdot.");
    } else {
        let mut file = File::create(args.output).expect("PANIC: Unable to open output file.");
        file.write_all(printed.as_bytes())
            .expect("PANIC: Unable to write output file contents.");
    }
}
